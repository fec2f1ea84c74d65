//! Bulk sale saga.
//!
//! Sells every unsold item in four steps:
//!
//! 1. **Snapshot**: read the unsold items and capture each price now
//!    (read-only, retried with backoff)
//! 2. **Commit**: `mark_item_sold` each item at its captured price, one by one
//! 3. **Credit**: one `adjust_balance` for the captured total
//! 4. **Compensate**: if the credit fails, `mark_item_unsold` every item
//!    committed in step 2
//!
//! Steps 2–3 are not atomic. A failure partway through step 2 stops the
//! saga and leaves the items committed so far marked sold, uncredited; they
//! are reported in [`CasegateError::ItemCommitFailed`] for reconciliation.
//! A failed revert in step 4 is a [`CasegateError::CompensationFailed`].

use casegate_types::{
    BalanceOperation, BulkSaleTransaction, CasegateError, InventoryItemId, RetryPolicy, UserId,
};

use crate::{ledger::Ledger, retry::retry_read};

/// A failed saga run together with how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaFailure {
    /// State at the point of failure. After a successful compensation
    /// `applied_items` is empty; after a failed one it lists the items still
    /// marked sold.
    pub transaction: BulkSaleTransaction,
    pub error: CasegateError,
    /// The credit failed in transport, so the ledger may have applied it
    /// anyway. Reconciliation must check the balance before trusting the
    /// revert.
    pub credit_indeterminate: bool,
}

impl SagaFailure {
    fn new(transaction: BulkSaleTransaction, error: CasegateError) -> Self {
        Self {
            transaction,
            error,
            credit_indeterminate: false,
        }
    }
}

/// One bulk sale against a ledger.
pub struct BulkSaleSaga<'a, L: ?Sized> {
    ledger: &'a L,
    retry: RetryPolicy,
}

impl<'a, L: Ledger + ?Sized> BulkSaleSaga<'a, L> {
    #[must_use]
    pub fn new(ledger: &'a L, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    /// Run all steps for `user_id`.
    ///
    /// # Errors
    /// - [`CasegateError::NothingToSell`] when the snapshot is empty
    /// - transport errors from the snapshot once retries are exhausted
    /// - [`CasegateError::ItemCommitFailed`] when step 2 stops early
    /// - [`CasegateError::CreditFailed`] when the credit failed and every
    ///   commit was reverted
    /// - [`CasegateError::CompensationFailed`] when some reverts failed
    pub async fn run(&self, user_id: UserId) -> std::result::Result<BulkSaleTransaction, SagaFailure> {
        let ledger = self.ledger;

        // 1. Snapshot
        let items = retry_read(&self.retry, "fetch_unsold_items", || {
            ledger.fetch_unsold_items(user_id)
        })
        .await
        .map_err(|error| SagaFailure::new(BulkSaleTransaction::snapshot(user_id, &[]), error))?;

        let mut tx = BulkSaleTransaction::snapshot(user_id, &items);
        if tx.is_empty() {
            return Err(SagaFailure::new(tx, CasegateError::NothingToSell));
        }
        tracing::debug!(
            user = %user_id,
            items = tx.items.len(),
            total = %tx.total_value,
            "Bulk sale snapshot"
        );

        // 2. Commit each item
        for line in tx.items.clone() {
            let outcome = ledger
                .mark_item_sold(line.item_id, user_id, line.captured_price)
                .await;
            let reason = match outcome {
                Ok(ack) if ack.success => {
                    tx.record_applied(line.item_id);
                    continue;
                }
                Ok(ack) => ack.reason(),
                Err(err) => err.to_string(),
            };
            tracing::warn!(
                user = %user_id,
                item = %line.item_id,
                committed = tx.applied_items.len(),
                reason = %reason,
                "Bulk sale item commit failed"
            );
            let error = CasegateError::ItemCommitFailed {
                item_id: line.item_id,
                committed: tx.applied_items.len(),
                reason,
            };
            return Err(SagaFailure::new(tx, error));
        }

        // 3. Aggregate credit
        let mut credit_indeterminate = false;
        let reason = match ledger
            .adjust_balance(user_id, tx.total_value, BalanceOperation::SellAll)
            .await
        {
            Ok(resp) if resp.success => {
                tx.commit(resp.new_balance);
                tracing::info!(
                    user = %user_id,
                    items = tx.items.len(),
                    total = %tx.total_value,
                    new_balance = %resp.new_balance,
                    "Bulk sale committed"
                );
                return Ok(tx);
            }
            Ok(resp) => resp.message.unwrap_or_else(|| "credit rejected".to_string()),
            Err(err) => {
                credit_indeterminate = err.is_indeterminate();
                err.to_string()
            }
        };

        // 4. Compensate
        tracing::warn!(
            user = %user_id,
            reason = %reason,
            indeterminate = credit_indeterminate,
            "Bulk sale credit failed, reverting"
        );
        let unreverted = self.revert(user_id, &tx.applied_items).await;
        let reverted = tx.applied_items.len() - unreverted.len();
        tx.applied_items.clone_from(&unreverted);

        let error = if unreverted.is_empty() {
            CasegateError::CreditFailed {
                amount: tx.total_value,
                reverted,
                reason,
            }
        } else {
            tracing::error!(
                user = %user_id,
                unreverted = unreverted.len(),
                "Bulk sale compensation failed"
            );
            CasegateError::CompensationFailed { unreverted, reason }
        };
        Err(SagaFailure {
            transaction: tx,
            error,
            credit_indeterminate,
        })
    }

    /// Revert `applied`, newest first. Returns the items that could not be
    /// reverted, in commit order.
    async fn revert(&self, user_id: UserId, applied: &[InventoryItemId]) -> Vec<InventoryItemId> {
        let mut unreverted = Vec::new();
        for &item_id in applied.iter().rev() {
            match self.ledger.mark_item_unsold(item_id, user_id).await {
                Ok(ack) if ack.success => {}
                Ok(ack) => {
                    tracing::warn!(item = %item_id, reason = %ack.reason(), "Revert rejected");
                    unreverted.push(item_id);
                }
                Err(err) => {
                    tracing::warn!(item = %item_id, error = %err, "Revert failed");
                    unreverted.push(item_id);
                }
            }
        }
        unreverted.reverse();
        unreverted
    }
}
