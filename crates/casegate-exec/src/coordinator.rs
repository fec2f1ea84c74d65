//! Action coordinator: the single entry point for money-moving actions.
//!
//! ## Dispatch Pipeline
//!
//! ```text
//! validate → SlidingWindowLimiter → EscalatingLockout → Gesture latch
//!          → SessionGuard (case openings) → Ledger call
//!          → settle latch → AuditTrail → invalidate projection
//! ```
//!
//! Every refusal before the ledger call is audited and returned without
//! touching the ledger. Every dispatched call settles the gesture latch
//! exactly once: success shuts it for good, failure releases it.
//! Money-moving calls are never retried here.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use casegate_guard::{
    EscalatingLockout, Gesture, MemorySessionStore, SessionGuard, SessionStore,
    SlidingWindowLimiter,
};
use casegate_types::{
    ActionAttempt, ActionType, AuditEntry, BulkSaleTransaction, CaseId, CaseOpeningResult,
    CasegateConfig, CasegateError, Clock, ErrorKind, IdempotencyToken, InventoryItemId,
    OpenCaseRequest, Result, SellItemResponse, SessionId, SystemClock, UserId,
};
use serde_json::json;

use crate::{
    audit::{AuditTrail, RiskClassifier, RiskSignal},
    ledger::Ledger,
    projection::{Projection, ProjectionCache},
    saga::BulkSaleSaga,
};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| CasegateError::Internal(format!("{what} poisoned")))
}

fn limiter_key(user_id: UserId, action: ActionType) -> String {
    format!("{user_id}:{action}")
}

// ---------------------------------------------------------------------------
// Permit
// ---------------------------------------------------------------------------

/// Proof that an attempt passed admission and holds its gesture's latch.
///
/// Dropping an unsettled permit releases the latch.
#[must_use = "dropping a permit releases the gesture"]
#[derive(Debug)]
pub struct Permit<'g> {
    gesture: &'g Gesture,
    attempt: ActionAttempt,
    settled: bool,
}

impl Permit<'_> {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.attempt.user_id
    }

    #[must_use]
    pub fn action(&self) -> ActionType {
        self.attempt.action
    }

    /// The attempt this permit was granted for, still pending.
    #[must_use]
    pub fn attempt(&self) -> &ActionAttempt {
        &self.attempt
    }

    fn succeed(mut self) -> Result<ActionAttempt> {
        self.settled = true;
        self.attempt.settle(true);
        self.gesture.succeed()?;
        Ok(self.attempt.clone())
    }

    fn fail(mut self) -> Result<ActionAttempt> {
        self.settled = true;
        self.attempt.settle(false);
        self.gesture.release()?;
        Ok(self.attempt.clone())
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.gesture.release();
        }
    }
}

// ---------------------------------------------------------------------------
// ActionCoordinator
// ---------------------------------------------------------------------------

/// Owns every piece of admission state for one client session.
pub struct ActionCoordinator<L: ?Sized> {
    ledger: Arc<L>,
    config: CasegateConfig,
    clock: Arc<dyn Clock>,
    limiter: Mutex<SlidingWindowLimiter>,
    /// Only actions with a configured lockout have an entry.
    lockouts: Mutex<HashMap<ActionType, EscalatingLockout>>,
    sessions: SessionGuard<Arc<dyn SessionStore>>,
    audit: Mutex<AuditTrail>,
    classifier: RiskClassifier,
    projections: ProjectionCache<L>,
}

impl<L: Ledger + ?Sized + 'static> ActionCoordinator<L> {
    /// A coordinator on the system clock with an in-memory session store.
    pub fn new(ledger: Arc<L>, config: CasegateConfig) -> Result<Self> {
        Self::with_parts(
            ledger,
            config,
            Arc::new(SystemClock),
            Arc::new(MemorySessionStore::new()),
        )
    }

    /// A coordinator with an explicit clock and session store.
    ///
    /// # Errors
    /// - [`CasegateError::Configuration`] if `config` does not validate
    /// - session store read failures
    pub fn with_parts(
        ledger: Arc<L>,
        config: CasegateConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        config.validate()?;

        let sessions = SessionGuard::open(store, config.session_ttl_ms, clock.now_ms())?;
        let lockouts = ActionType::ALL
            .into_iter()
            .filter_map(|action| {
                config
                    .lockout(action)
                    .map(|cfg| (action, EscalatingLockout::new(cfg)))
            })
            .collect();
        let projections = ProjectionCache::new(
            Arc::clone(&ledger),
            Arc::clone(&clock),
            config.read_retry,
            Duration::from_millis(config.debounce_ms),
        );

        tracing::info!(
            lockouts = ?ActionType::ALL.iter().filter(|a| config.lockout(**a).is_some()).collect::<Vec<_>>(),
            session_ttl_ms = config.session_ttl_ms,
            "Coordinator ready"
        );

        Ok(Self {
            ledger,
            classifier: RiskClassifier::new(config.risk),
            config,
            clock,
            limiter: Mutex::new(SlidingWindowLimiter::new()),
            lockouts: Mutex::new(lockouts),
            sessions,
            audit: Mutex::new(AuditTrail::new()),
            projections,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CasegateConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Client-side checks on an open-case request. A failure is audited.
    pub fn validate_open_case(&self, request: &OpenCaseRequest) -> Result<()> {
        request
            .validate()
            .map_err(|err| self.refuse(request.user_id, ActionType::OpenCase, err))
    }

    /// Run limiter, lockout and latch for one attempt.
    ///
    /// # Errors
    /// - [`CasegateError::RateLimited`] / [`CasegateError::LockedOut`]
    /// - [`CasegateError::GestureInFlight`] / [`CasegateError::GestureCompleted`]
    pub fn admit<'g>(&self, gesture: &'g Gesture, user_id: UserId, action: ActionType) -> Result<Permit<'g>> {
        let now = self.clock.now_ms();
        let key = limiter_key(user_id, action);
        let limit = self.config.rate_limit(action);

        let throttled = {
            let mut limiter = lock(&self.limiter, "limiter")?;
            if limiter.is_allowed(&key, limit.max_requests, limit.window_ms, now) {
                None
            } else {
                Some(limiter.retry_after_ms(&key, limit.max_requests, limit.window_ms, now))
            }
        };
        if let Some(retry_after_ms) = throttled {
            return Err(self.refuse(user_id, action, CasegateError::RateLimited { action, retry_after_ms }));
        }

        if let Some(retry_after_ms) = self.check_lockout(user_id, action, now)? {
            return Err(self.refuse(user_id, action, CasegateError::LockedOut { action, retry_after_ms }));
        }

        if let Err(err) = gesture.try_begin() {
            return Err(self.refuse(user_id, action, err));
        }

        tracing::debug!(user = %user_id, action = %action, "Action admitted");
        Ok(Permit {
            gesture,
            attempt: ActionAttempt::pending(user_id, action, self.clock.now()),
            settled: false,
        })
    }

    /// `Some(wait)` if the lockout denies this attempt.
    fn check_lockout(&self, user_id: UserId, action: ActionType, now: u64) -> Result<Option<u64>> {
        let mut lockouts = lock(&self.lockouts, "lockouts")?;
        let Some(lockout) = lockouts.get_mut(&action) else {
            return Ok(None);
        };
        if lockout.can_perform(user_id, action, now) {
            return Ok(None);
        }
        Ok(Some(
            lockout
                .blocked_until(user_id, action, now)
                .map_or(0, |until| until.saturating_sub(now)),
        ))
    }

    /// Audit a refusal that never reached the ledger and hand the error back.
    fn refuse(&self, user_id: UserId, action: ActionType, err: CasegateError) -> CasegateError {
        match err.kind() {
            ErrorKind::Throttled => tracing::warn!(
                user = %user_id,
                action = %action,
                retry_after_ms = err.retry_after_ms().unwrap_or(0),
                "Action throttled"
            ),
            _ => tracing::debug!(user = %user_id, action = %action, error = %err, "Action refused"),
        }
        match self.audit(user_id, action, json!({ "dispatched": false }), false, Some(&err)) {
            Ok(()) => err,
            Err(audit_err) => audit_err,
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Validate, admit, and dispatch a case opening for `gesture`.
    pub async fn open_case(&self, gesture: &Gesture, request: &OpenCaseRequest) -> Result<CaseOpeningResult> {
        self.validate_open_case(request)?;
        let permit = self.admit(gesture, request.user_id, ActionType::OpenCase)?;
        self.open_case_with(permit, request).await
    }

    /// Dispatch a case opening under an already-granted permit.
    ///
    /// A live session token for the same (user, case) refuses the call with
    /// [`CasegateError::SessionInFlight`]. The token is consumed once the
    /// ledger answers; after a transport failure it stays live until it
    /// expires, since the opening may have gone through.
    pub async fn open_case_with(&self, permit: Permit<'_>, request: &OpenCaseRequest) -> Result<CaseOpeningResult> {
        if permit.action() != ActionType::OpenCase || permit.user_id() != request.user_id {
            return Err(CasegateError::Internal(
                "permit does not cover this open_case request".to_string(),
            ));
        }
        let user_id = request.user_id;

        let token = match self.sessions.begin(user_id, request.case_id.0, self.clock.now_ms()) {
            Ok(token) => token,
            Err(err) => return Err(self.refuse(user_id, ActionType::OpenCase, err)),
        };
        tracing::debug!(
            user = %user_id,
            case = %request.case_id,
            session = %token.session_id,
            free = request.is_free,
            "Dispatching open_case"
        );

        let outcome = match self.ledger.open_case(request).await {
            Ok(resp) if resp.success => {
                self.consume_session(token.session_id);
                Ok(CaseOpeningResult {
                    session_id: token.session_id,
                    success: true,
                    reward: resp.reward,
                    rewards: resp.roulette_items,
                    winner_index: resp.winner_index,
                    new_balance: resp.new_balance,
                    error: None,
                })
            }
            Ok(resp) => {
                self.consume_session(token.session_id);
                Err(CasegateError::RemoteRejection {
                    action: ActionType::OpenCase,
                    message: resp.error.unwrap_or_else(|| "case opening rejected".to_string()),
                })
            }
            Err(err) => Err(err),
        };

        let mut details = json!({
            "dispatched": true,
            "case_id": request.case_id.to_string(),
            "session_id": token.session_id.to_string(),
            "is_free": request.is_free,
        });
        if let (Ok(result), Some(map)) = (&outcome, details.as_object_mut()) {
            if !result.is_consistent() {
                tracing::warn!(session = %result.session_id, "Winner index does not match reward");
            }
            map.insert("winner_index".into(), json!(result.winner_index));
            map.insert("new_balance".into(), json!(result.new_balance.to_string()));
            if let Some(reward) = &result.reward {
                map.insert("reward".into(), json!(reward.display_name));
                map.insert("rarity".into(), json!(reward.rarity.to_string()));
            }
        }
        self.settle(permit, details, outcome)
    }

    /// Admit and dispatch a single-item sale.
    pub async fn sell_item(
        &self,
        gesture: &Gesture,
        user_id: UserId,
        item_id: InventoryItemId,
    ) -> Result<SellItemResponse> {
        let permit = self.admit(gesture, user_id, ActionType::SellItem)?;
        tracing::debug!(user = %user_id, item = %item_id, "Dispatching sell_item");

        let outcome = match self.ledger.sell_item(item_id, user_id).await {
            Ok(resp) if resp.success => Ok(resp),
            Ok(resp) => Err(CasegateError::RemoteRejection {
                action: ActionType::SellItem,
                message: resp.message.unwrap_or_else(|| "sale rejected".to_string()),
            }),
            Err(err) => Err(err),
        };

        let mut details = json!({ "dispatched": true, "item_id": item_id.to_string() });
        if let (Ok(resp), Some(map)) = (&outcome, details.as_object_mut()) {
            map.insert("new_balance".into(), json!(resp.new_balance.to_string()));
        }
        self.settle(permit, details, outcome)
    }

    /// Admit and run the bulk sale saga.
    pub async fn sell_all(&self, gesture: &Gesture, user_id: UserId) -> Result<BulkSaleTransaction> {
        let permit = self.admit(gesture, user_id, ActionType::SellAll)?;
        tracing::debug!(user = %user_id, "Dispatching sell_all");

        let saga = BulkSaleSaga::new(self.ledger.as_ref(), self.config.read_retry);
        let (outcome, tx, indeterminate) = match saga.run(user_id).await {
            Ok(tx) => (Ok(tx.clone()), tx, false),
            Err(failure) => (Err(failure.error), failure.transaction, failure.credit_indeterminate),
        };

        let mut details = json!({
            "dispatched": true,
            "items": tx.items.len(),
            "applied": tx.applied_items.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "total_value": tx.total_value.to_string(),
            "committed": tx.committed,
            "new_balance": tx.new_balance.map(|b| b.to_string()),
        });
        if let (true, Some(map)) = (indeterminate, details.as_object_mut()) {
            map.insert("indeterminate".into(), json!(true));
        }
        self.settle(permit, details, outcome)
    }

    fn consume_session(&self, session_id: SessionId) {
        if let Err(err) = self.sessions.consume(session_id) {
            tracing::warn!(session = %session_id, error = %err, "Session consume failed");
        }
    }

    /// Settle the latch, audit, and schedule a projection refetch for a
    /// dispatched attempt.
    ///
    /// Once the ledger has answered, its outcome is what the caller gets:
    /// bookkeeping failures after that point are logged, never returned.
    fn settle<T>(&self, permit: Permit<'_>, details: serde_json::Value, outcome: Result<T>) -> Result<T> {
        let (user_id, action) = (permit.user_id(), permit.action());
        let success = outcome.is_ok();
        let settled = if success { permit.succeed() } else { permit.fail() };
        let elapsed_ms = match &settled {
            Ok(attempt) => self.elapsed_ms(attempt),
            Err(err) => {
                tracing::error!(user = %user_id, action = %action, error = %err, "Gesture settle failed");
                -1
            }
        };

        match &outcome {
            Ok(_) => tracing::info!(user = %user_id, action = %action, elapsed_ms, "Action completed"),
            Err(err) if err.kind() == ErrorKind::Compensation => {
                tracing::error!(user = %user_id, action = %action, elapsed_ms, error = %err, "Action failed");
            }
            Err(err) => {
                tracing::warn!(user = %user_id, action = %action, elapsed_ms, error = %err, "Action failed");
            }
        }

        if let Err(err) = self.audit(user_id, action, details, success, outcome.as_ref().err()) {
            tracing::error!(user = %user_id, action = %action, error = %err, "Audit write failed after dispatch");
        }
        if let Err(err) = self.projections.invalidate(user_id) {
            tracing::warn!(user = %user_id, error = %err, "Projection invalidate failed");
        }
        outcome
    }

    fn elapsed_ms(&self, attempt: &ActionAttempt) -> i64 {
        (self.clock.now() - attempt.timestamp).num_milliseconds()
    }

    fn audit(
        &self,
        user_id: UserId,
        action: ActionType,
        mut details: serde_json::Value,
        success: bool,
        error: Option<&CasegateError>,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let recent = lock(&self.limiter, "limiter")?.recent_count(
            &limiter_key(user_id, action),
            self.classifier.window_ms(),
            now,
        );
        let risk = self
            .classifier
            .classify(action, recent, RiskSignal::from_error(error));

        if let (Some(err), Some(map)) = (error, details.as_object_mut()) {
            map.insert("error".into(), json!(err.to_string()));
        }
        lock(&self.audit, "audit trail")?.record(user_id, action, details, success, risk, self.clock.now());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read views
    // -----------------------------------------------------------------------

    /// Admissions left for (user, action) in the current window.
    pub fn remaining_requests(&self, user_id: UserId, action: ActionType) -> Result<usize> {
        let limit = self.config.rate_limit(action);
        Ok(lock(&self.limiter, "limiter")?.remaining_requests(
            &limiter_key(user_id, action),
            limit.max_requests,
            limit.window_ms,
            self.clock.now_ms(),
        ))
    }

    /// The live session token for (user, case), for reattaching after a
    /// reload.
    pub fn live_session(&self, user_id: UserId, case_id: CaseId) -> Result<Option<IdempotencyToken>> {
        self.sessions.live(user_id, case_id.0, self.clock.now_ms())
    }

    /// Cached projection; `None` until loaded or while a refetch is pending.
    pub fn projection(&self, user_id: UserId) -> Result<Option<Projection>> {
        self.projections.get(user_id)
    }

    /// Read the ledger now (with retry) and cache the result.
    pub async fn refresh_projection(&self, user_id: UserId) -> Result<Projection> {
        self.projections.refresh(user_id).await
    }

    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.audit, "audit trail")?.entries().to_vec())
    }

    /// Entries from `sequence` on.
    pub fn audit_since(&self, sequence: u64) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.audit, "audit trail")?.since(sequence).to_vec())
    }

    pub fn high_risk_entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.audit, "audit trail")?
            .high_risk()
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn verify_audit(&self) -> Result<()> {
        lock(&self.audit, "audit trail")?.verify_chain()
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    /// Drop idle limiter keys, idle lockout records, and dead session
    /// tokens. Returns how many were removed in total.
    pub fn sweep(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let window = ActionType::ALL
            .into_iter()
            .map(|action| self.config.rate_limit(action).window_ms)
            .chain([self.classifier.window_ms()])
            .max()
            .unwrap_or(0);

        let mut removed = lock(&self.limiter, "limiter")?.sweep(window, now);
        removed += lock(&self.lockouts, "lockouts")?
            .values_mut()
            .map(|lockout| lockout.sweep(now))
            .sum::<usize>();
        removed += self.sessions.sweep(now)?;
        tracing::debug!(removed, "Sweep complete");
        Ok(removed)
    }

    /// Cancel pending projection refetches.
    pub fn shutdown(&self) -> Result<()> {
        self.projections.shutdown()
    }
}
