//! Inventory and bulk-sale types.
//!
//! A bulk sale captures every unsold item's price at snapshot time. The
//! captured price, not the price at credit time, is what gets stamped on
//! the item and credited to the balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{InventoryItemId, Rarity, UserId};

/// The ledger's view of one owned item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryItemId,
    pub user_id: UserId,
    pub display_name: String,
    pub rarity: Rarity,
    /// Current sale price.
    pub price: Decimal,
    pub sold: bool,
    pub sold_price: Option<Decimal>,
    pub sold_at: Option<DateTime<Utc>>,
}

impl InventoryItem {
    /// Clear the sold markers.
    pub fn mark_unsold(&mut self) {
        self.sold = false;
        self.sold_price = None;
        self.sold_at = None;
    }
}

/// One item in a bulk sale with the price captured at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: InventoryItemId,
    pub captured_price: Decimal,
}

/// State of one bulk sale.
///
/// Invariant: `committed ⇒ applied_items == items` and the balance was
/// credited exactly once for `total_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSaleTransaction {
    pub user_id: UserId,
    pub items: Vec<SaleLine>,
    /// Items already marked sold on the ledger, in commit order.
    pub applied_items: Vec<InventoryItemId>,
    pub total_value: Decimal,
    pub committed: bool,
    /// Balance reported by the ledger after the credit.
    pub new_balance: Option<Decimal>,
}

impl BulkSaleTransaction {
    /// Snapshot unsold items, capturing each one's current price.
    #[must_use]
    pub fn snapshot(user_id: UserId, inventory: &[InventoryItem]) -> Self {
        let items: Vec<SaleLine> = inventory
            .iter()
            .filter(|item| !item.sold && item.user_id == user_id)
            .map(|item| SaleLine {
                item_id: item.id,
                captured_price: item.price,
            })
            .collect();
        let total_value = items.iter().map(|line| line.captured_price).sum();
        Self {
            user_id,
            items,
            applied_items: Vec::new(),
            total_value,
            committed: false,
            new_balance: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record a successful per-item commit.
    pub fn record_applied(&mut self, item_id: InventoryItemId) {
        self.applied_items.push(item_id);
    }

    /// Whether every snapshotted item has been committed.
    #[must_use]
    pub fn all_applied(&self) -> bool {
        self.applied_items.len() == self.items.len()
            && self
                .items
                .iter()
                .zip(&self.applied_items)
                .all(|(line, applied)| line.item_id == *applied)
    }

    /// Mark the sale committed after the aggregate credit succeeded.
    pub fn commit(&mut self, new_balance: Decimal) {
        debug_assert!(self.all_applied(), "commit before every item applied");
        self.committed = true;
        self.new_balance = Some(new_balance);
    }
}

/// Dummy inventory for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl InventoryItem {
    /// An unsold item owned by `user_id` at `price`.
    pub fn dummy(user_id: UserId, name: &str, price: Decimal) -> Self {
        Self {
            id: InventoryItemId::new(),
            user_id,
            display_name: name.to_string(),
            rarity: Rarity::Common,
            price,
            sold: false,
            sold_price: None,
            sold_at: None,
        }
    }
}
