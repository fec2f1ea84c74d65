//! Monetary actions a user can trigger and the in-memory record of one
//! dispatch attempt.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// The money-moving actions routed through the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Open a case for a randomized reward.
    OpenCase,
    /// Sell one inventory item back to the ledger.
    SellItem,
    /// Sell every unsold inventory item in one bulk sale.
    SellAll,
}

impl ActionType {
    /// Every action, in a stable order.
    pub const ALL: [Self; 3] = [Self::OpenCase, Self::SellItem, Self::SellAll];

    /// Stable label used in limiter keys, logs, and audit entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenCase => "open_case",
            Self::SellItem => "sell_item",
            Self::SellAll => "sell_all",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure,
}

/// One dispatch of an action. Lives only for the duration of the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAttempt {
    pub user_id: UserId,
    pub action: ActionType,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl ActionAttempt {
    /// Start a pending attempt.
    #[must_use]
    pub fn pending(user_id: UserId, action: ActionType, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            action,
            timestamp,
            outcome: AttemptOutcome::Pending,
        }
    }

    /// Record the terminal outcome. Only a pending attempt can settle.
    pub fn settle(&mut self, success: bool) {
        if self.outcome == AttemptOutcome::Pending {
            self.outcome = if success {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            };
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.outcome == AttemptOutcome::Pending
    }
}
