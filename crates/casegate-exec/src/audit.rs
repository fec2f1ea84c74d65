//! Append-only audit trail and risk classification.
//!
//! Every attempt the coordinator sees, admitted or not, lands here exactly
//! once. Entries are hash-chained (see [`AuditEntry::compute_digest`]) so
//! the external monitor can detect a rewritten history. The trail is also
//! mirrored to `tracing`: High-risk entries at `warn`, the rest at `info`.

use casegate_types::{
    ActionType, AuditEntry, CasegateError, Result, RiskLevel, RiskThresholds, UserId,
};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// RiskClassifier
// ---------------------------------------------------------------------------

/// What happened to the attempt, as far as risk is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSignal {
    /// Admitted, or refused for a reason that carries no extra risk.
    Ordinary,
    /// Refused by the sliding-window limiter.
    RateLimited,
    /// Refused by the escalating lockout.
    LockedOut,
    /// A bulk sale stopped with items marked sold but never credited.
    UncreditedCommit,
    /// Reverting a partial bulk sale failed.
    CompensationFailed,
}

impl RiskSignal {
    /// Derive the signal from an attempt's error, if any.
    #[must_use]
    pub fn from_error(err: Option<&CasegateError>) -> Self {
        match err {
            Some(CasegateError::RateLimited { .. }) => Self::RateLimited,
            Some(CasegateError::LockedOut { .. }) => Self::LockedOut,
            Some(CasegateError::ItemCommitFailed { committed, .. }) if *committed > 0 => Self::UncreditedCommit,
            Some(CasegateError::CompensationFailed { .. }) => Self::CompensationFailed,
            _ => Self::Ordinary,
        }
    }
}

/// Grades attempts by recent per-(user, action) frequency.
///
/// ```text
/// count > high             → HIGH
/// count > high / 2         → MEDIUM
/// otherwise                → LOW
/// lockout                  → HIGH
/// sold but uncredited      → HIGH
/// failed compensation      → HIGH
/// limiter denial           → at least MEDIUM
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
}

impl RiskClassifier {
    #[must_use]
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Window over which `recent_count` should be measured.
    #[must_use]
    pub fn window_ms(&self) -> u64 {
        self.thresholds.window_ms
    }

    #[must_use]
    pub fn classify(&self, action: ActionType, recent_count: usize, signal: RiskSignal) -> RiskLevel {
        let high = self.thresholds.high_for(action);
        let by_frequency = if recent_count > high {
            RiskLevel::High
        } else if recent_count > high / 2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        match signal {
            RiskSignal::LockedOut | RiskSignal::UncreditedCommit | RiskSignal::CompensationFailed => {
                RiskLevel::High
            }
            RiskSignal::RateLimited => by_frequency.max(RiskLevel::Medium),
            RiskSignal::Ordinary => by_frequency,
        }
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

// ---------------------------------------------------------------------------
// AuditTrail
// ---------------------------------------------------------------------------

/// Hash-chained, append-only attempt log.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
    /// Digest of the last entry; all zeros for an empty trail.
    head: [u8; 32],
}

impl AuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry and return it.
    pub fn record(
        &mut self,
        user_id: UserId,
        action: ActionType,
        details: serde_json::Value,
        success: bool,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    ) -> &AuditEntry {
        let sequence = self.entries.len() as u64;
        let digest = AuditEntry::compute_digest(
            &self.head,
            sequence,
            user_id,
            action,
            &details,
            success,
            risk_level,
            timestamp,
        );
        let entry = AuditEntry {
            sequence,
            user_id,
            action,
            details,
            success,
            risk_level,
            timestamp,
            digest,
        };

        if risk_level == RiskLevel::High {
            tracing::warn!(
                seq = sequence,
                user = %user_id,
                action = %action,
                success,
                risk = %risk_level,
                details = %entry.details,
                digest = %entry.digest_short(),
                "Audit"
            );
        } else {
            tracing::info!(
                seq = sequence,
                user = %user_id,
                action = %action,
                success,
                risk = %risk_level,
                digest = %entry.digest_short(),
                "Audit"
            );
        }

        self.head = digest;
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries with `sequence >= from`, for a reader resuming where it
    /// left off.
    #[must_use]
    pub fn since(&self, from: u64) -> &[AuditEntry] {
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(self.entries.len());
        &self.entries[start..]
    }

    #[must_use]
    pub fn for_user(&self, user_id: UserId) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| e.user_id == user_id).collect()
    }

    #[must_use]
    pub fn high_risk(&self) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.risk_level == RiskLevel::High)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute every digest from genesis.
    ///
    /// # Errors
    /// Returns [`CasegateError::Internal`] naming the first entry whose
    /// sequence or digest does not match.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev = [0u8; 32];
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.sequence != index as u64 || !entry.verify(&prev) {
                return Err(CasegateError::Internal(format!(
                    "audit chain broken at sequence {index}"
                )));
            }
            prev = entry.digest;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use casegate_types::InventoryItemId;
    use serde_json::json;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn classifier_frequency_bands() {
        let c = RiskClassifier::default();
        // open_case: high = 20, half = 10.
        assert_eq!(c.classify(ActionType::OpenCase, 10, RiskSignal::Ordinary), RiskLevel::Low);
        assert_eq!(c.classify(ActionType::OpenCase, 11, RiskSignal::Ordinary), RiskLevel::Medium);
        assert_eq!(c.classify(ActionType::OpenCase, 20, RiskSignal::Ordinary), RiskLevel::Medium);
        assert_eq!(c.classify(ActionType::OpenCase, 21, RiskSignal::Ordinary), RiskLevel::High);
        // sell_all: high = 3, half = 1.
        assert_eq!(c.classify(ActionType::SellAll, 1, RiskSignal::Ordinary), RiskLevel::Low);
        assert_eq!(c.classify(ActionType::SellAll, 2, RiskSignal::Ordinary), RiskLevel::Medium);
        assert_eq!(c.classify(ActionType::SellAll, 4, RiskSignal::Ordinary), RiskLevel::High);
    }

    #[test]
    fn classifier_signals() {
        let c = RiskClassifier::default();
        assert_eq!(c.classify(ActionType::SellItem, 0, RiskSignal::LockedOut), RiskLevel::High);
        assert_eq!(
            c.classify(ActionType::SellAll, 0, RiskSignal::CompensationFailed),
            RiskLevel::High
        );
        assert_eq!(c.classify(ActionType::SellItem, 0, RiskSignal::RateLimited), RiskLevel::Medium);
        assert_eq!(c.classify(ActionType::SellItem, 50, RiskSignal::RateLimited), RiskLevel::High);
    }

    #[test]
    fn signal_from_error() {
        let locked = CasegateError::LockedOut {
            action: ActionType::SellAll,
            retry_after_ms: 1,
        };
        assert_eq!(RiskSignal::from_error(Some(&locked)), RiskSignal::LockedOut);
        assert_eq!(RiskSignal::from_error(Some(&CasegateError::AdNotWatched)), RiskSignal::Ordinary);

        let partial = |committed| CasegateError::ItemCommitFailed {
            item_id: InventoryItemId::new(),
            committed,
            reason: "rejected".into(),
        };
        assert_eq!(RiskSignal::from_error(Some(&partial(2))), RiskSignal::UncreditedCommit);
        assert_eq!(RiskSignal::from_error(Some(&partial(0))), RiskSignal::Ordinary);
        assert_eq!(
            RiskClassifier::default().classify(ActionType::SellAll, 0, RiskSignal::UncreditedCommit),
            RiskLevel::High
        );
        assert_eq!(RiskSignal::from_error(None), RiskSignal::Ordinary);
    }

    #[test]
    fn trail_is_sequenced_and_chained() {
        let mut trail = AuditTrail::new();
        let alice = UserId::new();
        let bob = UserId::new();

        trail.record(alice, ActionType::OpenCase, json!({"case": 1}), true, RiskLevel::Low, ts());
        trail.record(bob, ActionType::SellAll, json!({}), false, RiskLevel::High, ts());
        trail.record(alice, ActionType::SellItem, json!({"item": 2}), true, RiskLevel::Low, ts());

        assert_eq!(trail.len(), 3);
        let seqs: Vec<u64> = trail.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(trail.verify_chain().is_ok());

        assert_eq!(trail.for_user(alice).len(), 2);
        assert_eq!(trail.high_risk().len(), 1);
        assert_eq!(trail.since(1).len(), 2);
        assert_eq!(trail.since(1)[0].user_id, bob);
        assert!(trail.since(99).is_empty());
    }

    #[test]
    fn tampering_breaks_chain() {
        let mut trail = AuditTrail::new();
        let user = UserId::new();
        for i in 0..4 {
            trail.record(user, ActionType::SellItem, json!({"i": i}), true, RiskLevel::Low, ts());
        }
        trail.entries[2].success = false;
        let err = trail.verify_chain().unwrap_err();
        assert!(err.to_string().contains("sequence 2"));
    }
}
