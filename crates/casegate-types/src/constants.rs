//! System-wide constants for the casegate coordination layer.

/// Default sliding window length for per-action rate limits (milliseconds).
pub const DEFAULT_RATE_WINDOW_MS: u64 = 60_000;

/// Default case openings admitted per user per window.
pub const DEFAULT_OPEN_CASE_PER_WINDOW: usize = 30;

/// Default single-item sales admitted per user per window.
pub const DEFAULT_SELL_ITEM_PER_WINDOW: usize = 30;

/// Default bulk sales admitted per user per window.
pub const DEFAULT_SELL_ALL_PER_WINDOW: usize = 5;

/// Attempts tolerated inside one lockout reset interval before blocking.
pub const DEFAULT_LOCKOUT_MAX_ATTEMPTS: u32 = 5;

/// Quiet period after which the lockout attempt counter starts over (milliseconds).
pub const DEFAULT_LOCKOUT_RESET_INTERVAL_MS: u64 = 60_000;

/// Hard block applied once the lockout trips (milliseconds).
pub const DEFAULT_LOCKOUT_BLOCK_DURATION_MS: u64 = 300_000;

/// Lifetime of a persisted case-opening session token (milliseconds).
pub const DEFAULT_SESSION_TTL_MS: u64 = 600_000;

/// Trailing debounce delay for coalesced work (milliseconds).
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Attempt cap for retried read-only ledger calls.
pub const DEFAULT_READ_RETRY_ATTEMPTS: u32 = 3;

/// First backoff delay for retried read-only ledger calls (milliseconds).
pub const DEFAULT_READ_RETRY_BASE_MS: u64 = 200;

/// Backoff multiplier applied after each failed read attempt.
pub const DEFAULT_READ_RETRY_MULTIPLIER: u32 = 2;

/// Window the risk classifier looks back over (milliseconds).
pub const RISK_WINDOW_MS: u64 = 60_000;

/// Case openings per risk window above which an attempt is High risk.
pub const RISK_HIGH_OPEN_CASE: usize = 20;

/// Single-item sales per risk window above which an attempt is High risk.
pub const RISK_HIGH_SELL_ITEM: usize = 10;

/// Bulk sales per risk window above which an attempt is High risk.
pub const RISK_HIGH_SELL_ALL: usize = 3;

/// Domain separator for the audit digest chain.
pub const AUDIT_DIGEST_DOMAIN: &[u8] = b"casegate:audit:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "casegate";
