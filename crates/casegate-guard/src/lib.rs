//! # casegate-guard
//!
//! **Admission plane**: everything that decides whether an action may be
//! dispatched right now, and that it is dispatched at most once.
//!
//! ## Components
//!
//! 1. **SlidingWindowLimiter**: per-key request counter over a rolling window
//! 2. **EscalatingLockout**: hard block-and-cooldown after repeated attempts
//! 3. **Gesture**: one-shot latch (`Idle → InFlight → Done`) per user gesture
//! 4. **Debouncer**: trailing debounce that coalesces rapid re-triggers
//! 5. **SessionGuard**: persisted idempotency tokens with a TTL, surviving reloads
//!
//! ## Admission Flow
//!
//! ```text
//! gesture → SlidingWindowLimiter.is_allowed() → EscalatingLockout.can_perform()
//!         → Gesture.try_begin() → SessionGuard.begin() → ledger call
//! ```
//!
//! All state is owned by injected instances; nothing here is process-global.

pub mod debounce;
pub mod latch;
pub mod limiter;
pub mod lockout;
pub mod session;

pub use debounce::Debouncer;
pub use latch::{Gesture, LatchState};
pub use limiter::SlidingWindowLimiter;
pub use lockout::{EscalatingLockout, LockoutRecord};
pub use session::{FileSessionStore, MemorySessionStore, SessionGuard, SessionStore};
