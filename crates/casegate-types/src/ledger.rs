//! Request and reply shapes of the remote ledger's call contracts.
//!
//! The ledger is an opaque external service. These types fix only the
//! logical shape of each call; the transport is up to the `Ledger`
//! implementation.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CaseId, CasegateError, Result, RewardItem, RewardRef, UserId};

/// Arguments of an `open_case` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCaseRequest {
    pub user_id: UserId,
    pub case_id: CaseId,
    /// Reward pre-selected by the caller, if any.
    pub reward_hint: Option<RewardRef>,
    pub is_free: bool,
    pub ad_watched: bool,
}

impl OpenCaseRequest {
    /// A paid opening with no reward hint.
    #[must_use]
    pub fn paid(user_id: UserId, case_id: CaseId) -> Self {
        Self {
            user_id,
            case_id,
            reward_hint: None,
            is_free: false,
            ad_watched: false,
        }
    }

    /// A free opening gated on an ad view.
    #[must_use]
    pub fn free(user_id: UserId, case_id: CaseId, ad_watched: bool) -> Self {
        Self {
            user_id,
            case_id,
            reward_hint: None,
            is_free: true,
            ad_watched,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: RewardRef) -> Self {
        self.reward_hint = Some(hint);
        self
    }

    /// Client-side checks that must pass before dispatch.
    ///
    /// # Errors
    /// Returns [`CasegateError::AdNotWatched`] for a free case without an
    /// ad view.
    pub fn validate(&self) -> Result<()> {
        if self.is_free && !self.ad_watched {
            return Err(CasegateError::AdNotWatched);
        }
        Ok(())
    }
}

/// Reply of an `open_case` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCaseResponse {
    pub success: bool,
    pub reward: Option<RewardItem>,
    pub new_balance: Decimal,
    pub roulette_items: Vec<RewardItem>,
    pub winner_index: usize,
    pub error: Option<String>,
}

impl OpenCaseResponse {
    /// A rejection carrying only a message.
    #[must_use]
    pub fn rejected(message: impl Into<String>, balance: Decimal) -> Self {
        Self {
            success: false,
            reward: None,
            new_balance: balance,
            roulette_items: Vec::new(),
            winner_index: 0,
            error: Some(message.into()),
        }
    }
}

/// Reply of a single-item `sell_item` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellItemResponse {
    pub success: bool,
    pub new_balance: Decimal,
    pub message: Option<String>,
}

/// Why a balance is being adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceOperation {
    SellAll,
    CaseOpening,
    AdminAdjustment,
}

impl fmt::Display for BalanceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SellAll => "sell_all",
            Self::CaseOpening => "case_opening",
            Self::AdminAdjustment => "admin_adjustment",
        };
        f.write_str(s)
    }
}

/// Reply of an `adjust_balance` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub success: bool,
    pub new_balance: Decimal,
    pub message: Option<String>,
}

/// Reply of `mark_item_sold` / `mark_item_unsold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAck {
    pub success: bool,
    pub message: Option<String>,
}

impl LedgerAck {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// The rejection message, or a generic one.
    #[must_use]
    pub fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "ledger returned success=false".to_string())
    }
}
