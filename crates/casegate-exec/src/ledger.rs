//! The remote ledger contract.
//!
//! The ledger is the source of truth for balances and inventory. Every
//! method is a network round trip: a rejection comes back as a reply with
//! `success == false`, a transport failure as
//! [`CasegateError::Transport`](casegate_types::CasegateError::Transport).

use async_trait::async_trait;
use casegate_types::{
    BalanceOperation, BalanceResponse, InventoryItem, InventoryItemId, LedgerAck, OpenCaseRequest,
    OpenCaseResponse, Result, SellItemResponse, UserId,
};
use rust_decimal::Decimal;

/// Remote ledger operations used by the coordinator and the saga.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Debit (unless free), roll, and grant a reward.
    async fn open_case(&self, request: &OpenCaseRequest) -> Result<OpenCaseResponse>;

    /// Sell one item at its current price.
    async fn sell_item(&self, item_id: InventoryItemId, user_id: UserId) -> Result<SellItemResponse>;

    /// Apply a signed delta to a balance.
    async fn adjust_balance(
        &self,
        user_id: UserId,
        delta: Decimal,
        operation: BalanceOperation,
    ) -> Result<BalanceResponse>;

    /// Flag an item sold at `sold_price` without crediting the balance.
    async fn mark_item_sold(
        &self,
        item_id: InventoryItemId,
        user_id: UserId,
        sold_price: Decimal,
    ) -> Result<LedgerAck>;

    /// Reverse [`Ledger::mark_item_sold`].
    async fn mark_item_unsold(&self, item_id: InventoryItemId, user_id: UserId) -> Result<LedgerAck>;

    /// Read-only: the user's unsold items.
    async fn fetch_unsold_items(&self, user_id: UserId) -> Result<Vec<InventoryItem>>;

    /// Read-only: the user's balance.
    async fn fetch_balance(&self, user_id: UserId) -> Result<Decimal>;
}
