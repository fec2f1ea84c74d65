//! Configuration types for the coordination layer.
//!
//! Every field has a default from [`crate::constants`]; a JSON config file
//! only needs to name what it overrides.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{ActionType, CasegateError, Result, constants};

/// Sliding-window admission limit for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl RateLimitConfig {
    #[must_use]
    pub fn per_minute(max_requests: usize) -> Self {
        Self {
            max_requests,
            window_ms: constants::DEFAULT_RATE_WINDOW_MS,
        }
    }
}

/// Escalating lockout policy for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Attempts tolerated inside one reset interval.
    pub max_attempts: u32,
    pub reset_interval_ms: u64,
    pub block_duration_ms: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_LOCKOUT_MAX_ATTEMPTS,
            reset_interval_ms: constants::DEFAULT_LOCKOUT_RESET_INTERVAL_MS,
            block_duration_ms: constants::DEFAULT_LOCKOUT_BLOCK_DURATION_MS,
        }
    }
}

/// Exponential backoff for read-only ledger calls. Money-moving calls are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_READ_RETRY_ATTEMPTS,
            base_delay_ms: constants::DEFAULT_READ_RETRY_BASE_MS,
            multiplier: constants::DEFAULT_READ_RETRY_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Per-action frequency above which an attempt is classified High risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub window_ms: u64,
    pub open_case: usize,
    pub sell_item: usize,
    pub sell_all: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            window_ms: constants::RISK_WINDOW_MS,
            open_case: constants::RISK_HIGH_OPEN_CASE,
            sell_item: constants::RISK_HIGH_SELL_ITEM,
            sell_all: constants::RISK_HIGH_SELL_ALL,
        }
    }
}

impl RiskThresholds {
    #[must_use]
    pub fn high_for(&self, action: ActionType) -> usize {
        match action {
            ActionType::OpenCase => self.open_case,
            ActionType::SellItem => self.sell_item,
            ActionType::SellAll => self.sell_all,
        }
    }
}

/// Top-level configuration for one coordinator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasegateConfig {
    pub open_case_limit: RateLimitConfig,
    pub sell_item_limit: RateLimitConfig,
    pub sell_all_limit: RateLimitConfig,
    pub open_case_lockout: Option<LockoutConfig>,
    pub sell_item_lockout: Option<LockoutConfig>,
    pub sell_all_lockout: Option<LockoutConfig>,
    pub session_ttl_ms: u64,
    pub debounce_ms: u64,
    pub read_retry: RetryPolicy,
    pub risk: RiskThresholds,
}

impl Default for CasegateConfig {
    fn default() -> Self {
        Self {
            open_case_limit: RateLimitConfig::per_minute(constants::DEFAULT_OPEN_CASE_PER_WINDOW),
            sell_item_limit: RateLimitConfig::per_minute(constants::DEFAULT_SELL_ITEM_PER_WINDOW),
            sell_all_limit: RateLimitConfig::per_minute(constants::DEFAULT_SELL_ALL_PER_WINDOW),
            open_case_lockout: None,
            sell_item_lockout: None,
            sell_all_lockout: Some(LockoutConfig::default()),
            session_ttl_ms: constants::DEFAULT_SESSION_TTL_MS,
            debounce_ms: constants::DEFAULT_DEBOUNCE_MS,
            read_retry: RetryPolicy::default(),
            risk: RiskThresholds::default(),
        }
    }
}

impl CasegateConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| CasegateError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    #[must_use]
    pub fn rate_limit(&self, action: ActionType) -> RateLimitConfig {
        match action {
            ActionType::OpenCase => self.open_case_limit,
            ActionType::SellItem => self.sell_item_limit,
            ActionType::SellAll => self.sell_all_limit,
        }
    }

    #[must_use]
    pub fn lockout(&self, action: ActionType) -> Option<LockoutConfig> {
        match action {
            ActionType::OpenCase => self.open_case_lockout,
            ActionType::SellItem => self.sell_item_lockout,
            ActionType::SellAll => self.sell_all_lockout,
        }
    }

    /// Reject limits that would deny everything or never expire.
    pub fn validate(&self) -> Result<()> {
        for action in ActionType::ALL {
            let limit = self.rate_limit(action);
            if limit.max_requests == 0 || limit.window_ms == 0 {
                return Err(CasegateError::Configuration(format!(
                    "{action} rate limit must have non-zero max_requests and window_ms"
                )));
            }
            if let Some(lockout) = self.lockout(action) {
                if lockout.max_attempts == 0 || lockout.block_duration_ms == 0 {
                    return Err(CasegateError::Configuration(format!(
                        "{action} lockout must have non-zero max_attempts and block_duration_ms"
                    )));
                }
            }
        }
        if self.session_ttl_ms == 0 {
            return Err(CasegateError::Configuration(
                "session_ttl_ms must be non-zero".to_string(),
            ));
        }
        if self.read_retry.max_attempts == 0 {
            return Err(CasegateError::Configuration(
                "read_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
