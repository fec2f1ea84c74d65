//! Audit entry types.
//!
//! Every attempt the coordinator sees produces one [`AuditEntry`]. Entries
//! form a hash chain: each digest commits to the previous entry's digest,
//! so a rewritten or dropped entry breaks every digest after it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ActionType, UserId, constants};

/// Risk attached to an attempt for the external monitoring surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, starting at 0.
    pub sequence: u64,
    pub user_id: UserId,
    pub action: ActionType,
    /// Structured, action-specific details.
    pub details: serde_json::Value,
    pub success: bool,
    pub risk_level: RiskLevel,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 over the previous digest and this entry's fields.
    pub digest: [u8; 32],
}

impl AuditEntry {
    /// Canonical digest for an entry's fields chained to `prev`.
    ///
    /// Format: `domain || prev(32) || sequence(8) || user_id(16) || action(utf8)
    /// || details(json) || success(1) || risk(utf8) || timestamp_ms(8)`
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn compute_digest(
        prev: &[u8; 32],
        sequence: u64,
        user_id: UserId,
        action: ActionType,
        details: &serde_json::Value,
        success: bool,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    ) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(constants::AUDIT_DIGEST_DOMAIN);
        hasher.update(prev);
        hasher.update(sequence.to_le_bytes());
        hasher.update(user_id.0.as_bytes());
        hasher.update(action.as_str().as_bytes());
        hasher.update(details.to_string().as_bytes());
        hasher.update([u8::from(success)]);
        hasher.update(risk_level.to_string().as_bytes());
        hasher.update(timestamp.timestamp_millis().to_le_bytes());
        hasher.finalize().into()
    }

    /// Recompute this entry's digest against `prev`.
    #[must_use]
    pub fn verify(&self, prev: &[u8; 32]) -> bool {
        Self::compute_digest(
            prev,
            self.sequence,
            self.user_id,
            self.action,
            &self.details,
            self.success,
            self.risk_level,
            self.timestamp,
        ) == self.digest
    }

    /// Short hex form of the digest for logs.
    #[must_use]
    pub fn digest_short(&self) -> String {
        hex::encode(&self.digest[..8])
    }
}
