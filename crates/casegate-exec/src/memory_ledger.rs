//! In-process ledger.
//!
//! Backs the simulator and the test suites. Holds balances, inventory and
//! case definitions behind one mutex, counts every call, and can be told to
//! misbehave: reject specific operations, drop calls at the transport
//! layer, or answer slowly.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use casegate_types::{
    BalanceOperation, BalanceResponse, CaseId, CasegateError, InventoryItem, InventoryItemId,
    LedgerAck, OpenCaseRequest, OpenCaseResponse, Rarity, Result, RewardItem, RewardKind,
    SellItemResponse, UserId,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;

use crate::ledger::Ledger;

/// Ledger operation, for call accounting and fault targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerCall {
    OpenCase,
    SellItem,
    AdjustBalance,
    MarkItemSold,
    MarkItemUnsold,
    FetchUnsoldItems,
    FetchBalance,
}

impl fmt::Display for LedgerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OpenCase => "open_case",
            Self::SellItem => "sell_item",
            Self::AdjustBalance => "adjust_balance",
            Self::MarkItemSold => "mark_item_sold",
            Self::MarkItemUnsold => "mark_item_unsold",
            Self::FetchUnsoldItems => "fetch_unsold_items",
            Self::FetchBalance => "fetch_balance",
        };
        f.write_str(s)
    }
}

/// A case as the ledger knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDefinition {
    pub price: Decimal,
    /// Every reward the case can drop, in strip order.
    pub strip: Vec<RewardItem>,
}

#[derive(Debug, Default)]
struct Faults {
    reject_open_case: Option<String>,
    reject_credit: Option<String>,
    /// Reject `mark_item_sold` once this many calls have succeeded.
    fail_mark_sold_after: Option<usize>,
    reject_unsold: bool,
    /// Remaining transport failures per call.
    transport: HashMap<LedgerCall, usize>,
}

#[derive(Debug, Default)]
struct State {
    balances: HashMap<UserId, Decimal>,
    items: BTreeMap<InventoryItemId, InventoryItem>,
    cases: HashMap<CaseId, CaseDefinition>,
    calls: HashMap<LedgerCall, usize>,
    marked_sold: usize,
    faults: Faults,
    latency: Option<Duration>,
}

impl State {
    fn balance(&self, user_id: UserId) -> Decimal {
        self.balances.get(&user_id).copied().unwrap_or(Decimal::ZERO)
    }

    fn owned_mut(&mut self, item_id: InventoryItemId, user_id: UserId) -> Option<&mut InventoryItem> {
        self.items
            .get_mut(&item_id)
            .filter(|item| item.user_id == user_id)
    }
}

/// An in-memory [`Ledger`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it is applied.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call, apply latency, and fail it if a transport fault is
    /// armed for it.
    async fn enter(&self, call: LedgerCall) -> Result<()> {
        let (latency, dropped) = {
            let mut state = self.state();
            *state.calls.entry(call).or_default() += 1;
            let dropped = match state.faults.transport.get_mut(&call) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (state.latency, dropped)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if dropped {
            tracing::debug!(call = %call, "Simulated transport failure");
            return Err(CasegateError::Transport {
                reason: format!("{call}: connection reset"),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Seeding and inspection
    // -----------------------------------------------------------------------

    pub fn set_balance(&self, user_id: UserId, amount: Decimal) {
        self.state().balances.insert(user_id, amount);
    }

    #[must_use]
    pub fn balance(&self, user_id: UserId) -> Decimal {
        self.state().balance(user_id)
    }

    pub fn add_case(&self, case_id: CaseId, definition: CaseDefinition) {
        self.state().cases.insert(case_id, definition);
    }

    pub fn add_item(&self, item: InventoryItem) {
        self.state().items.insert(item.id, item);
    }

    /// Put a fresh unsold item into `user_id`'s inventory.
    pub fn grant_item(&self, user_id: UserId, name: &str, rarity: Rarity, price: Decimal) -> InventoryItemId {
        let item = InventoryItem {
            id: InventoryItemId::new(),
            user_id,
            display_name: name.to_string(),
            rarity,
            price,
            sold: false,
            sold_price: None,
            sold_at: None,
        };
        let id = item.id;
        self.add_item(item);
        id
    }

    #[must_use]
    pub fn item(&self, item_id: InventoryItemId) -> Option<InventoryItem> {
        self.state().items.get(&item_id).cloned()
    }

    /// Every item the user owns, sold or not.
    #[must_use]
    pub fn items_of(&self, user_id: UserId) -> Vec<InventoryItem> {
        self.state()
            .items
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect()
    }

    /// How many times `call` has reached this ledger.
    #[must_use]
    pub fn calls(&self, call: LedgerCall) -> usize {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    pub fn reject_open_case(&self, message: Option<&str>) {
        self.state().faults.reject_open_case = message.map(str::to_string);
    }

    pub fn reject_credit(&self, message: Option<&str>) {
        self.state().faults.reject_credit = message.map(str::to_string);
    }

    /// Reject `mark_item_sold` after `successes` more calls succeed.
    pub fn fail_mark_sold_after(&self, successes: Option<usize>) {
        let mut state = self.state();
        let base = state.marked_sold;
        state.faults.fail_mark_sold_after = successes.map(|n| base + n);
    }

    pub fn reject_unsold(&self, reject: bool) {
        self.state().faults.reject_unsold = reject;
    }

    /// Fail the next `times` calls of `call` at the transport layer.
    pub fn fail_transport(&self, call: LedgerCall, times: usize) {
        self.state().faults.transport.insert(call, times);
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn open_case(&self, request: &OpenCaseRequest) -> Result<OpenCaseResponse> {
        self.enter(LedgerCall::OpenCase).await?;
        let mut state = self.state();
        let user_id = request.user_id;
        let balance = state.balance(user_id);

        if let Some(message) = state.faults.reject_open_case.clone() {
            return Ok(OpenCaseResponse::rejected(message, balance));
        }
        let Some(case) = state.cases.get(&request.case_id).cloned() else {
            return Ok(OpenCaseResponse::rejected("case not found", balance));
        };
        if request.is_free && !request.ad_watched {
            return Ok(OpenCaseResponse::rejected("ad not watched", balance));
        }
        if case.strip.is_empty() {
            return Ok(OpenCaseResponse::rejected("case has no rewards", balance));
        }
        let price = if request.is_free { Decimal::ZERO } else { case.price };
        if balance < price {
            return Ok(OpenCaseResponse::rejected("insufficient balance", balance));
        }

        let winner_index = request
            .reward_hint
            .and_then(|hint| case.strip.iter().position(|r| r.id == hint))
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..case.strip.len()));
        let reward = case.strip[winner_index].clone();

        let mut new_balance = balance - price;
        match reward.kind() {
            RewardKind::CoinGrant => new_balance += reward.monetary_value,
            RewardKind::Skin => {
                let item = InventoryItem {
                    id: InventoryItemId::new(),
                    user_id,
                    display_name: reward.display_name.clone(),
                    rarity: reward.rarity,
                    price: reward.monetary_value,
                    sold: false,
                    sold_price: None,
                    sold_at: None,
                };
                state.items.insert(item.id, item);
            }
        }
        state.balances.insert(user_id, new_balance);

        Ok(OpenCaseResponse {
            success: true,
            reward: Some(reward),
            new_balance,
            roulette_items: case.strip,
            winner_index,
            error: None,
        })
    }

    async fn sell_item(&self, item_id: InventoryItemId, user_id: UserId) -> Result<SellItemResponse> {
        self.enter(LedgerCall::SellItem).await?;
        let mut state = self.state();
        let balance = state.balance(user_id);

        let Some(item) = state.owned_mut(item_id, user_id) else {
            return Ok(SellItemResponse {
                success: false,
                new_balance: balance,
                message: Some("item not found".to_string()),
            });
        };
        if item.sold {
            return Ok(SellItemResponse {
                success: false,
                new_balance: balance,
                message: Some("item already sold".to_string()),
            });
        }
        let price = item.price;
        item.sold = true;
        item.sold_price = Some(price);
        item.sold_at = Some(Utc::now());

        let new_balance = balance + price;
        state.balances.insert(user_id, new_balance);
        Ok(SellItemResponse {
            success: true,
            new_balance,
            message: None,
        })
    }

    async fn adjust_balance(
        &self,
        user_id: UserId,
        delta: Decimal,
        operation: BalanceOperation,
    ) -> Result<BalanceResponse> {
        self.enter(LedgerCall::AdjustBalance).await?;
        let mut state = self.state();
        let balance = state.balance(user_id);

        if let Some(message) = state.faults.reject_credit.clone() {
            return Ok(BalanceResponse {
                success: false,
                new_balance: balance,
                message: Some(message),
            });
        }
        let new_balance = balance + delta;
        if new_balance < Decimal::ZERO {
            return Ok(BalanceResponse {
                success: false,
                new_balance: balance,
                message: Some("insufficient balance".to_string()),
            });
        }
        state.balances.insert(user_id, new_balance);
        tracing::debug!(user = %user_id, %delta, operation = %operation, "Balance adjusted");
        Ok(BalanceResponse {
            success: true,
            new_balance,
            message: None,
        })
    }

    async fn mark_item_sold(
        &self,
        item_id: InventoryItemId,
        user_id: UserId,
        sold_price: Decimal,
    ) -> Result<LedgerAck> {
        self.enter(LedgerCall::MarkItemSold).await?;
        let mut state = self.state();

        if state
            .faults
            .fail_mark_sold_after
            .is_some_and(|limit| state.marked_sold >= limit)
        {
            return Ok(LedgerAck::failed("item commit rejected"));
        }
        let Some(item) = state.owned_mut(item_id, user_id) else {
            return Ok(LedgerAck::failed("item not found"));
        };
        if item.sold {
            return Ok(LedgerAck::failed("item already sold"));
        }
        item.sold = true;
        item.sold_price = Some(sold_price);
        item.sold_at = Some(Utc::now());
        state.marked_sold += 1;
        Ok(LedgerAck::ok())
    }

    async fn mark_item_unsold(&self, item_id: InventoryItemId, user_id: UserId) -> Result<LedgerAck> {
        self.enter(LedgerCall::MarkItemUnsold).await?;
        let mut state = self.state();

        if state.faults.reject_unsold {
            return Ok(LedgerAck::failed("revert rejected"));
        }
        let Some(item) = state.owned_mut(item_id, user_id) else {
            return Ok(LedgerAck::failed("item not found"));
        };
        if !item.sold {
            return Ok(LedgerAck::failed("item not sold"));
        }
        item.mark_unsold();
        Ok(LedgerAck::ok())
    }

    async fn fetch_unsold_items(&self, user_id: UserId) -> Result<Vec<InventoryItem>> {
        self.enter(LedgerCall::FetchUnsoldItems).await?;
        Ok(self
            .state()
            .items
            .values()
            .filter(|item| item.user_id == user_id && !item.sold)
            .cloned()
            .collect())
    }

    async fn fetch_balance(&self, user_id: UserId) -> Result<Decimal> {
        self.enter(LedgerCall::FetchBalance).await?;
        Ok(self.state().balance(user_id))
    }
}
