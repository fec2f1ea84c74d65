//! Reward model: what a case can drop, and the immutable result of one
//! case opening.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CoinRewardId, SessionId, SkinId};

/// Drop rarity tier, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
        };
        f.write_str(s)
    }
}

/// Whether a reward is an inventory skin or a direct coin grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Skin,
    CoinGrant,
}

/// Typed reference to a droppable reward. Also used as the optional
/// reward hint sent with an `open_case` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RewardRef {
    Skin(SkinId),
    Coin(CoinRewardId),
}

impl RewardRef {
    #[must_use]
    pub fn kind(&self) -> RewardKind {
        match self {
            Self::Skin(_) => RewardKind::Skin,
            Self::Coin(_) => RewardKind::CoinGrant,
        }
    }
}

impl fmt::Display for RewardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skin(id) => write!(f, "skin:{id}"),
            Self::Coin(id) => write!(f, "coin:{id}"),
        }
    }
}

/// One entry on a case's roulette strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardItem {
    pub id: RewardRef,
    pub display_name: String,
    pub rarity: Rarity,
    /// Sale price of a skin, or the amount of a coin grant.
    pub monetary_value: Decimal,
}

impl RewardItem {
    #[must_use]
    pub fn kind(&self) -> RewardKind {
        self.id.kind()
    }
}

/// Outcome of one case opening. Produced once; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOpeningResult {
    /// The session this opening was dispatched under.
    pub session_id: SessionId,
    pub success: bool,
    /// The won reward, present when `success`.
    pub reward: Option<RewardItem>,
    /// The roulette strip to animate, in display order.
    pub rewards: Vec<RewardItem>,
    /// Index into `rewards` the animation must stop on.
    pub winner_index: usize,
    /// Balance reported by the ledger after the opening.
    pub new_balance: Decimal,
    pub error: Option<String>,
}

impl CaseOpeningResult {
    /// The strip entry the animation lands on, if the index is in range.
    #[must_use]
    pub fn winner(&self) -> Option<&RewardItem> {
        self.rewards.get(self.winner_index)
    }

    /// A successful result must point its winner index at the won reward.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if !self.success {
            return true;
        }
        match (&self.reward, self.winner()) {
            (Some(reward), Some(winner)) => reward.id == winner.id,
            (Some(_), None) => self.rewards.is_empty(),
            (None, _) => false,
        }
    }
}

/// Dummy rewards for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl RewardItem {
    /// A skin reward with a random ID.
    pub fn dummy_skin(name: &str, rarity: Rarity, value: Decimal) -> Self {
        Self {
            id: RewardRef::Skin(SkinId::from_bytes(rand::random())),
            display_name: name.to_string(),
            rarity,
            monetary_value: value,
        }
    }

    /// A coin grant with a random ID.
    pub fn dummy_coins(amount: Decimal) -> Self {
        Self {
            id: RewardRef::Coin(CoinRewardId::from_bytes(rand::random())),
            display_name: format!("{amount} coins"),
            rarity: Rarity::Common,
            monetary_value: amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> Vec<RewardItem> {
        vec![
            RewardItem::dummy_skin("Ember", Rarity::Common, Decimal::new(5, 0)),
            RewardItem::dummy_coins(Decimal::new(50, 0)),
            RewardItem::dummy_skin("Nova", Rarity::Legendary, Decimal::new(900, 0)),
        ]
    }

    #[test]
    fn reward_kind_follows_reference() {
        let items = strip();
        assert_eq!(items[0].kind(), RewardKind::Skin);
        assert_eq!(items[1].kind(), RewardKind::CoinGrant);
    }

    #[test]
    fn consistent_result_points_at_reward() {
        let rewards = strip();
        let result = CaseOpeningResult {
            session_id: SessionId::new(),
            success: true,
            reward: Some(rewards[2].clone()),
            rewards,
            winner_index: 2,
            new_balance: Decimal::new(100, 0),
            error: None,
        };
        assert!(result.is_consistent());
        assert_eq!(result.winner().unwrap().display_name, "Nova");
    }

    #[test]
    fn mismatched_winner_is_inconsistent() {
        let rewards = strip();
        let result = CaseOpeningResult {
            session_id: SessionId::new(),
            success: true,
            reward: Some(rewards[0].clone()),
            rewards,
            winner_index: 1,
            new_balance: Decimal::ZERO,
            error: None,
        };
        assert!(!result.is_consistent());
    }

    #[test]
    fn rarity_orders_low_to_high() {
        assert!(Rarity::Common < Rarity::Legendary);
        assert_eq!(Rarity::Epic.to_string(), "epic");
    }

    #[test]
    fn reward_ref_serde_is_tagged() {
        let r = RewardRef::Coin(CoinRewardId::new());
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["kind"], "coin");
        let back: RewardRef = serde_json::from_value(json).unwrap();
        assert_eq!(r, back);
    }
}
