//! Idempotency token. Correlates a reloaded or retried gesture with the
//! case opening already in flight.
//!
//! ## Lifecycle
//!
//! ```text
//!   ┌────────────┐  terminal result   ┌──────────┐
//!   │ UNCONSUMED ├───────────────────▶│ CONSUMED │
//!   └─────┬──────┘                    └──────────┘
//!         │ now > created_at + ttl
//!         ▼
//!   ┌─────────┐
//!   │ EXPIRED │  (resource eligible for a fresh attempt)
//!   └─────────┘
//! ```
//!
//! Consumption is irreversible and happens at most once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CasegateError, Result, SessionId, UserId};

/// A persisted session token for one (user, resource) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyToken {
    pub session_id: SessionId,
    pub user_id: UserId,
    /// The resource the gesture acts on (e.g. the case being opened).
    pub resource_id: Uuid,
    /// Creation instant, milliseconds since the UNIX epoch.
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub consumed: bool,
}

impl IdempotencyToken {
    /// Mint a fresh, unconsumed token.
    #[must_use]
    pub fn issue(user_id: UserId, resource_id: Uuid, created_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            session_id: SessionId::new(),
            user_id,
            resource_id,
            created_at_ms,
            ttl_ms,
            consumed: false,
        }
    }

    /// Last instant at which the token is still live.
    #[must_use]
    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    /// Expired strictly after `created_at + ttl`; the boundary instant is
    /// still live.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms()
    }

    /// Unconsumed and not yet expired.
    #[must_use]
    pub fn is_live(&self, now_ms: u64) -> bool {
        !self.consumed && !self.is_expired(now_ms)
    }

    /// Transition to consumed.
    ///
    /// # Errors
    /// Returns [`CasegateError::SessionAlreadyConsumed`] on a second call.
    pub fn consume(&mut self) -> Result<()> {
        if self.consumed {
            return Err(CasegateError::SessionAlreadyConsumed(self.session_id));
        }
        self.consumed = true;
        Ok(())
    }
}
