//! Case-opening state machine for one user gesture.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐  submit   ┌────────────┐  success  ┌───────────┐  finish_animation  ┌────────┐
//!   │ INIT ├──────────▶│ SUBMITTING ├──────────▶│ RESOLVING ├───────────────────▶│ RESULT │
//!   └──────┘           └─────┬──────┘           └───────────┘                    └────────┘
//!      ▲                     │ failure
//!      └─────────────────────┘
//! ```
//!
//! `Submitting → Resolving` happens at most once per instance because the
//! gesture latch shuts on success. `Resolving → Result` fires only on the
//! presentation layer's `finish_animation` signal, exactly once. A new
//! gesture builds a new machine.

use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

use casegate_guard::Gesture;
use casegate_types::{ActionType, CaseOpeningResult, CasegateError, OpenCaseRequest, Result};

use crate::{coordinator::ActionCoordinator, ledger::Ledger};

/// Current phase, carrying the result once there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Init,
    Submitting,
    /// The result is known; the roulette is animating towards the winner.
    Resolving(CaseOpeningResult),
    /// Terminal.
    Result(CaseOpeningResult),
}

/// Phase label without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Init,
    Submitting,
    Resolving,
    Result,
}

impl PhaseKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Submitting => "submitting",
            Self::Resolving => "resolving",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Phase {
    #[must_use]
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Init => PhaseKind::Init,
            Self::Submitting => PhaseKind::Submitting,
            Self::Resolving(_) => PhaseKind::Resolving,
            Self::Result(_) => PhaseKind::Result,
        }
    }
}

#[derive(Debug)]
struct Machine {
    phase: Phase,
    last_error: Option<CasegateError>,
}

/// One case opening, from click to revealed reward.
#[derive(Debug)]
pub struct CaseOpening {
    gesture: Gesture,
    machine: Mutex<Machine>,
}

impl CaseOpening {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gesture: Gesture::new(),
            machine: Mutex::new(Machine {
                phase: Phase::Init,
                last_error: None,
            }),
        }
    }

    fn machine(&self) -> Result<MutexGuard<'_, Machine>> {
        self.machine
            .lock()
            .map_err(|_| CasegateError::Internal("case opening state poisoned".to_string()))
    }

    /// Surface a refusal from before admission. Only an idle machine takes
    /// it; a refused concurrent trigger must not disturb an opening already
    /// in flight.
    fn refused(&self, err: CasegateError) -> CasegateError {
        let latch = matches!(err, CasegateError::GestureInFlight | CasegateError::GestureCompleted);
        if !latch {
            if let Ok(mut machine) = self.machine() {
                if machine.phase == Phase::Init {
                    machine.last_error = Some(err.clone());
                }
            }
        }
        err
    }

    /// Surface a failure of the admitted dispatch: back to `Init`.
    fn failed(&self, err: CasegateError) -> CasegateError {
        if let Ok(mut machine) = self.machine() {
            machine.phase = Phase::Init;
            machine.last_error = Some(err.clone());
        }
        tracing::debug!(error = %err, "Case opening back to init");
        err
    }

    /// Submit the opening. Concurrent or repeated calls on the same
    /// instance are refused by the gesture latch; only one reaches the
    /// ledger.
    ///
    /// # Errors
    /// Any refusal or failure from the coordinator. On failure the machine
    /// is back in `Init` with the error available via
    /// [`CaseOpening::last_error`].
    pub async fn submit<L>(&self, coordinator: &ActionCoordinator<L>, request: &OpenCaseRequest) -> Result<CaseOpeningResult>
    where
        L: Ledger + ?Sized + 'static,
    {
        coordinator
            .validate_open_case(request)
            .map_err(|err| self.refused(err))?;
        let permit = coordinator
            .admit(&self.gesture, request.user_id, ActionType::OpenCase)
            .map_err(|err| self.refused(err))?;

        {
            let mut machine = self.machine()?;
            machine.phase = Phase::Submitting;
            machine.last_error = None;
        }
        tracing::debug!(user = %request.user_id, case = %request.case_id, "Case opening submitting");

        match coordinator.open_case_with(permit, request).await {
            Ok(result) => {
                self.machine()?.phase = Phase::Resolving(result.clone());
                tracing::debug!(session = %result.session_id, winner = result.winner_index, "Case opening resolving");
                Ok(result)
            }
            Err(err) => Err(self.failed(err)),
        }
    }

    /// Presentation-layer signal that the roulette animation has stopped.
    ///
    /// # Errors
    /// [`CasegateError::InvalidTransition`] unless the machine is in
    /// `Resolving`.
    pub fn finish_animation(&self) -> Result<CaseOpeningResult> {
        let mut machine = self.machine()?;
        match &machine.phase {
            Phase::Resolving(result) => {
                let result = result.clone();
                machine.phase = Phase::Result(result.clone());
                Ok(result)
            }
            other => Err(CasegateError::InvalidTransition {
                from: other.kind().as_str(),
                event: "finish_animation",
            }),
        }
    }

    pub fn phase(&self) -> Result<Phase> {
        Ok(self.machine()?.phase.clone())
    }

    pub fn kind(&self) -> Result<PhaseKind> {
        Ok(self.machine()?.phase.kind())
    }

    /// The error surfaced by the last failed submit, cleared on the next
    /// submit.
    pub fn last_error(&self) -> Result<Option<CasegateError>> {
        Ok(self.machine()?.last_error.clone())
    }

    /// The result, once `Resolving` or `Result`.
    pub fn result(&self) -> Result<Option<CaseOpeningResult>> {
        Ok(match &self.machine()?.phase {
            Phase::Resolving(result) | Phase::Result(result) => Some(result.clone()),
            Phase::Init | Phase::Submitting => None,
        })
    }

    #[must_use]
    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }
}

impl Default for CaseOpening {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use casegate_types::{CaseId, CasegateConfig, ErrorKind, Rarity, RewardItem, UserId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::memory_ledger::{CaseDefinition, InMemoryLedger, LedgerCall};

    fn setup() -> (Arc<InMemoryLedger>, ActionCoordinator<InMemoryLedger>, OpenCaseRequest) {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = UserId::new();
        let case = CaseId::new();
        ledger.set_balance(user, Decimal::new(50, 0));
        ledger.add_case(
            case,
            CaseDefinition {
                price: Decimal::new(5, 0),
                strip: vec![RewardItem::dummy_skin("MP9 | Hot Rod", Rarity::Uncommon, Decimal::new(2, 0))],
            },
        );
        let coord = ActionCoordinator::new(Arc::clone(&ledger), CasegateConfig::default()).unwrap();
        (ledger, coord, OpenCaseRequest::paid(user, case))
    }

    #[tokio::test]
    async fn success_walks_to_result_once() {
        let (_, coord, req) = setup();
        let opening = CaseOpening::new();
        assert_eq!(opening.kind().unwrap(), PhaseKind::Init);

        let result = opening.submit(&coord, &req).await.unwrap();
        assert_eq!(opening.kind().unwrap(), PhaseKind::Resolving);
        assert_eq!(opening.result().unwrap(), Some(result.clone()));

        assert_eq!(opening.finish_animation().unwrap(), result);
        assert_eq!(opening.kind().unwrap(), PhaseKind::Result);
        assert_eq!(
            opening.finish_animation().unwrap_err(),
            CasegateError::InvalidTransition {
                from: "result",
                event: "finish_animation"
            }
        );
    }

    #[tokio::test]
    async fn finish_before_resolving_is_invalid() {
        let opening = CaseOpening::new();
        assert!(matches!(
            opening.finish_animation(),
            Err(CasegateError::InvalidTransition { from: "init", .. })
        ));
    }

    #[tokio::test]
    async fn rejection_returns_to_init_with_error() {
        let (ledger, coord, req) = setup();
        ledger.reject_open_case(Some("case disabled"));
        let opening = CaseOpening::new();

        let err = opening.submit(&coord, &req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteRejection);
        assert_eq!(opening.kind().unwrap(), PhaseKind::Init);
        assert_eq!(opening.last_error().unwrap(), Some(err));
        assert_eq!(opening.result().unwrap(), None);

        // Released latch: the same gesture may retry.
        ledger.reject_open_case(None);
        opening.submit(&coord, &req).await.unwrap();
        assert_eq!(opening.kind().unwrap(), PhaseKind::Resolving);
        assert_eq!(opening.last_error().unwrap(), None);
    }

    #[tokio::test]
    async fn resubmit_after_success_is_refused() {
        let (ledger, coord, req) = setup();
        let opening = CaseOpening::new();
        opening.submit(&coord, &req).await.unwrap();

        let err = opening.submit(&coord, &req).await.unwrap_err();
        assert_eq!(err, CasegateError::GestureCompleted);
        assert_eq!(opening.kind().unwrap(), PhaseKind::Resolving);
        assert_eq!(opening.last_error().unwrap(), None);
        assert_eq!(ledger.calls(LedgerCall::OpenCase), 1);
    }

    #[tokio::test]
    async fn validation_failure_stays_in_init() {
        let (ledger, coord, req) = setup();
        let free = OpenCaseRequest::free(req.user_id, req.case_id, false);
        let opening = CaseOpening::new();

        let err = opening.submit(&coord, &free).await.unwrap_err();
        assert_eq!(err, CasegateError::AdNotWatched);
        assert_eq!(opening.kind().unwrap(), PhaseKind::Init);
        assert_eq!(opening.last_error().unwrap(), Some(CasegateError::AdNotWatched));
        assert_eq!(ledger.calls(LedgerCall::OpenCase), 0);
    }
}
