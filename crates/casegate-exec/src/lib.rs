//! # casegate-exec
//!
//! **Execution plane**: dispatches admitted actions to the ledger and keeps
//! the local view consistent with what the ledger decided.
//!
//! ## Architecture
//!
//! The [`ActionCoordinator`] owns the admission state from `casegate-guard`
//! and, for every action:
//! 1. Validates the request (free openings need an ad view)
//! 2. Admits it (limiter → lockout → gesture latch)
//! 3. Takes a session token (case openings only)
//! 4. Calls the [`Ledger`] (or runs the [`BulkSaleSaga`] for sell-all)
//! 5. Records exactly one audit entry and invalidates the projection
//!
//! ## Ledger Access
//!
//! Reads are retried with backoff ([`retry_read`]); writes are never
//! retried. The local [`ProjectionCache`] is only ever replaced by a fresh
//! ledger read.

pub mod audit;
pub mod case_opening;
pub mod coordinator;
pub mod ledger;
pub mod memory_ledger;
pub mod projection;
pub mod retry;
pub mod saga;

pub use audit::{AuditTrail, RiskClassifier, RiskSignal};
pub use case_opening::{CaseOpening, Phase, PhaseKind};
pub use coordinator::{ActionCoordinator, Permit};
pub use ledger::Ledger;
pub use memory_ledger::{CaseDefinition, InMemoryLedger, LedgerCall};
pub use projection::{Projection, ProjectionCache};
pub use retry::retry_read;
pub use saga::{BulkSaleSaga, SagaFailure};
