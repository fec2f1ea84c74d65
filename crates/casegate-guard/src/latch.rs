//! One-shot latch owned by a single user gesture.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐  try_begin   ┌──────────┐  succeed   ┌──────┐
//!   │ IDLE ├─────────────▶│ IN_FLIGHT├───────────▶│ DONE │
//!   └──────┘              └────┬─────┘            └──────┘
//!      ▲                       │ release (failure)
//!      └───────────────────────┘
//! ```
//!
//! A trigger while `InFlight` or `Done` is rejected, never queued. `Done`
//! is permanent for the lifetime of the gesture; a fresh gesture gets a
//! fresh latch.

use std::sync::Mutex;

use casegate_types::{CasegateError, Result};

/// Latch state of one gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatchState {
    Idle,
    InFlight,
    Done,
}

/// A user gesture's one-shot latch.
#[derive(Debug)]
pub struct Gesture {
    state: Mutex<LatchState>,
}

impl Gesture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Idle),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LatchState) -> T) -> Result<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| CasegateError::Internal("gesture latch poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    /// Claim the gesture for one dispatch.
    ///
    /// # Errors
    /// - [`CasegateError::GestureInFlight`] if a dispatch is already running
    /// - [`CasegateError::GestureCompleted`] if the gesture already succeeded
    pub fn try_begin(&self) -> Result<()> {
        self.with_state(|state| match *state {
            LatchState::Idle => {
                *state = LatchState::InFlight;
                Ok(())
            }
            LatchState::InFlight => Err(CasegateError::GestureInFlight),
            LatchState::Done => Err(CasegateError::GestureCompleted),
        })?
    }

    /// Settle an in-flight dispatch as successful. The latch stays shut.
    pub fn succeed(&self) -> Result<()> {
        self.with_state(|state| {
            if *state == LatchState::InFlight {
                *state = LatchState::Done;
            }
        })
    }

    /// Settle an in-flight dispatch as failed so the user may retry.
    pub fn release(&self) -> Result<()> {
        self.with_state(|state| {
            if *state == LatchState::InFlight {
                *state = LatchState::Idle;
            }
        })
    }

    /// Current state.
    pub fn state(&self) -> Result<LatchState> {
        self.with_state(|state| *state)
    }
}

impl Default for Gesture {
    fn default() -> Self {
        Self::new()
    }
}
