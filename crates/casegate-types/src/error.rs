//! Error types for the casegate coordination layer.
//!
//! All errors use the `CG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by how the caller must react:
//! - 1xx: Validation (rejected before any ledger call, never retried)
//! - 2xx: Throttling (rejected locally with a remaining wait time)
//! - 3xx: Duplicate dispatch (the at-most-once guard refused a trigger)
//! - 4xx: Remote rejection (the ledger answered `success = false`)
//! - 5xx: Transport (the ledger could not be reached)
//! - 6xx: Bulk sale / compensation
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{ActionType, InventoryItemId, SessionId};

/// Coarse classification of a [`CasegateError`], used by callers to decide
/// how to surface it and whether anything may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Throttled,
    Duplicate,
    RemoteRejection,
    Transport,
    Compensation,
    Internal,
}

/// Central error enum for all casegate operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CasegateError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// An identifier supplied by the caller could not be parsed.
    #[error("CG_ERR_100: Invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },

    /// A free case was requested without a completed ad view.
    #[error("CG_ERR_101: Free case requires a watched ad")]
    AdNotWatched,

    /// A bulk sale found no unsold items to sell.
    #[error("CG_ERR_102: No unsold items to sell")]
    NothingToSell,

    /// A state machine was asked to make a transition it does not allow.
    #[error("CG_ERR_103: Invalid transition from {from} on {event}")]
    InvalidTransition { from: &'static str, event: &'static str },

    // =================================================================
    // Throttling Errors (2xx)
    // =================================================================
    /// The sliding-window limiter denied the attempt.
    #[error("CG_ERR_200: Rate limit exceeded for {action}, retry in {retry_after_ms}ms")]
    RateLimited {
        action: ActionType,
        retry_after_ms: u64,
    },

    /// The escalating lockout is currently blocking this user and action.
    #[error("CG_ERR_201: {action} locked out for {retry_after_ms}ms")]
    LockedOut {
        action: ActionType,
        retry_after_ms: u64,
    },

    // =================================================================
    // Duplicate Dispatch (3xx)
    // =================================================================
    /// The gesture already has a call in flight.
    #[error("CG_ERR_300: Gesture already in flight")]
    GestureInFlight,

    /// The gesture already reached its terminal result.
    #[error("CG_ERR_301: Gesture already completed")]
    GestureCompleted,

    /// An unexpired, unconsumed session exists for this resource; the caller
    /// should reattach to it instead of dispatching again.
    #[error("CG_ERR_302: Session {session_id} still in flight")]
    SessionInFlight { session_id: SessionId },

    /// A session token was consumed a second time.
    #[error("CG_ERR_303: Session {0} already consumed")]
    SessionAlreadyConsumed(SessionId),

    // =================================================================
    // Remote Rejections (4xx)
    // =================================================================
    /// The ledger refused the action. The message is surfaced verbatim.
    #[error("CG_ERR_400: Ledger rejected {action}: {message}")]
    RemoteRejection { action: ActionType, message: String },

    // =================================================================
    // Transport Errors (5xx)
    // =================================================================
    /// The ledger call failed in transit (network, timeout).
    #[error("CG_ERR_500: Transport failure: {reason}")]
    Transport { reason: String },

    /// A retried read-only call ran out of attempts.
    #[error("CG_ERR_501: Read failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    // =================================================================
    // Bulk Sale / Compensation (6xx)
    // =================================================================
    /// One per-item commit failed; earlier commits were left in place.
    #[error("CG_ERR_600: Commit of item {item_id} failed after {committed} committed: {reason}")]
    ItemCommitFailed {
        item_id: InventoryItemId,
        committed: usize,
        reason: String,
    },

    /// The aggregate credit failed and every committed item was reverted.
    #[error("CG_ERR_601: Balance credit of {amount} failed, {reverted} items reverted: {reason}")]
    CreditFailed {
        amount: Decimal,
        reverted: usize,
        reason: String,
    },

    /// The aggregate credit failed and at least one revert failed too.
    /// Requires external reconciliation.
    #[error("CG_ERR_602: Compensation failed for {} items after credit failure: {reason}", .unreverted.len())]
    CompensationFailed {
        unreverted: Vec<InventoryItemId>,
        reason: String,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("CG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (session store file).
    #[error("CG_ERR_903: I/O error: {0}")]
    Io(String),
}

impl CasegateError {
    /// Classify this error for the caller.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. }
            | Self::AdNotWatched
            | Self::NothingToSell
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::RateLimited { .. } | Self::LockedOut { .. } => ErrorKind::Throttled,
            Self::GestureInFlight
            | Self::GestureCompleted
            | Self::SessionInFlight { .. }
            | Self::SessionAlreadyConsumed(_) => ErrorKind::Duplicate,
            Self::RemoteRejection { .. } => ErrorKind::RemoteRejection,
            Self::Transport { .. } | Self::RetriesExhausted { .. } => ErrorKind::Transport,
            Self::ItemCommitFailed { .. }
            | Self::CreditFailed { .. }
            | Self::CompensationFailed { .. } => ErrorKind::Compensation,
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// How long the caller should wait before trying again, for throttling
    /// errors.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } | Self::LockedOut { retry_after_ms, .. } => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }

    /// Whether the outcome of the ledger call is unknown. A transport
    /// failure on a money-moving call may or may not have been applied.
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CasegateError>;

// Conversion from std::io::Error
impl From<std::io::Error> for CasegateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CasegateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
