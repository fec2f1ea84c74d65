//! # casegate-types
//!
//! Shared types, errors, and configuration for the **casegate** action
//! coordination layer.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`CaseId`], [`SkinId`], [`CoinRewardId`], [`InventoryItemId`], [`SessionId`]
//! - **Actions**: [`ActionType`], [`ActionAttempt`], [`AttemptOutcome`]
//! - **Rewards**: [`RewardItem`], [`RewardKind`], [`Rarity`], [`CaseOpeningResult`]
//! - **Inventory**: [`InventoryItem`], [`SaleLine`], [`BulkSaleTransaction`]
//! - **Sessions**: [`IdempotencyToken`]
//! - **Audit**: [`AuditEntry`], [`RiskLevel`]
//! - **Ledger contract shapes**: [`OpenCaseRequest`], [`OpenCaseResponse`], [`SellItemResponse`], [`BalanceResponse`], [`LedgerAck`]
//! - **Configuration**: [`CasegateConfig`], [`RateLimitConfig`], [`LockoutConfig`], [`RetryPolicy`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Errors**: [`CasegateError`] with `CG_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod action;
pub mod audit;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod inventory;
pub mod ledger;
pub mod reward;
pub mod session;

// Re-export all primary types at crate root for ergonomic imports:
//   use casegate_types::{UserId, CaseOpeningResult, CasegateError, ...};

pub use action::*;
pub use audit::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use inventory::*;
pub use ledger::*;
pub use reward::*;
pub use session::*;

// Constants are accessed via `casegate_types::constants::FOO`
// (not re-exported to avoid name collisions).
