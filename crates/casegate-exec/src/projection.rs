//! Local projection of a user's balance and unsold inventory.
//!
//! The projection is a read cache of ledger state. It is never adjusted
//! locally: after an action reaches a terminal state the entry is dropped
//! and a refetch is scheduled through a [`Debouncer`], so a burst of
//! terminal events costs one round trip.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use casegate_guard::Debouncer;
use casegate_types::{CasegateError, Clock, InventoryItem, Result, RetryPolicy, UserId};
use rust_decimal::Decimal;

use crate::{ledger::Ledger, retry::retry_read};

/// One user's cached ledger view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub balance: Decimal,
    pub unsold_items: Vec<InventoryItem>,
    /// When the ledger was read, milliseconds since the UNIX epoch.
    pub fetched_at_ms: u64,
}

type Entries = Arc<Mutex<HashMap<UserId, Projection>>>;

fn lock(entries: &Entries) -> Result<MutexGuard<'_, HashMap<UserId, Projection>>> {
    entries
        .lock()
        .map_err(|_| CasegateError::Internal("projection cache poisoned".to_string()))
}

async fn fetch<L: Ledger + ?Sized>(
    ledger: &L,
    retry: &RetryPolicy,
    clock: &dyn Clock,
    user_id: UserId,
) -> Result<Projection> {
    let balance = retry_read(retry, "fetch_balance", || ledger.fetch_balance(user_id)).await?;
    let unsold_items =
        retry_read(retry, "fetch_unsold_items", || ledger.fetch_unsold_items(user_id)).await?;
    Ok(Projection {
        balance,
        unsold_items,
        fetched_at_ms: clock.now_ms(),
    })
}

/// Per-user projection cache with debounced refetch.
pub struct ProjectionCache<L: ?Sized> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    entries: Entries,
    refresher: Debouncer<UserId>,
}

impl<L: Ledger + ?Sized + 'static> ProjectionCache<L> {
    #[must_use]
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>, retry: RetryPolicy, debounce: Duration) -> Self {
        Self {
            ledger,
            clock,
            retry,
            entries: Arc::new(Mutex::new(HashMap::new())),
            refresher: Debouncer::new(debounce),
        }
    }

    /// The cached projection, if one is loaded. Never touches the ledger.
    pub fn get(&self, user_id: UserId) -> Result<Option<Projection>> {
        Ok(lock(&self.entries)?.get(&user_id).cloned())
    }

    /// Read the ledger now and replace the cached entry.
    pub async fn refresh(&self, user_id: UserId) -> Result<Projection> {
        let projection = fetch(self.ledger.as_ref(), &self.retry, self.clock.as_ref(), user_id).await?;
        lock(&self.entries)?.insert(user_id, projection.clone());
        Ok(projection)
    }

    /// Drop the cached entry and schedule a debounced refetch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn invalidate(&self, user_id: UserId) -> Result<()> {
        lock(&self.entries)?.remove(&user_id);

        let ledger = Arc::clone(&self.ledger);
        let clock = Arc::clone(&self.clock);
        let entries = Arc::clone(&self.entries);
        let retry = self.retry;
        self.refresher.trigger(user_id, async move {
            match fetch(ledger.as_ref(), &retry, clock.as_ref(), user_id).await {
                Ok(projection) => {
                    if let Ok(mut map) = lock(&entries) {
                        map.insert(user_id, projection);
                    }
                }
                Err(err) => {
                    tracing::warn!(user = %user_id, error = %err, "Projection refetch failed");
                }
            }
        })
    }

    /// Cancel every scheduled refetch.
    pub fn shutdown(&self) -> Result<()> {
        self.refresher.cancel_all()
    }
}
