//! Escalating lockout: a hard block-and-cooldown policy.
//!
//! Where the sliding-window limiter smooths traffic, the lockout punishes
//! it: once a user exceeds `max_attempts` for an action inside one reset
//! interval, every further attempt is denied until `block_duration_ms`
//! has passed.
//!
//! ## Transition Rules (evaluated in order on every attempt)
//!
//! ```text
//! 1. blocked && now <  blocked_until  → deny, no state change
//! 2. blocked && now >= blocked_until  → unblock, count = 1, allow
//! 3. now - last_attempt > reset       → count = 1, allow
//! 4. otherwise                        → count += 1
//!                                       count > max → block, deny
//!                                       else        → allow
//! ```

use std::collections::HashMap;

use casegate_types::{ActionType, LockoutConfig, UserId};

/// Per-(user, action) lockout state.
///
/// Invariant: `blocked ⇒ blocked_until > last_attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutRecord {
    pub count: u32,
    pub last_attempt: u64,
    pub blocked: bool,
    pub blocked_until: u64,
}

impl LockoutRecord {
    fn first(now_ms: u64) -> Self {
        Self {
            count: 1,
            last_attempt: now_ms,
            blocked: false,
            blocked_until: 0,
        }
    }
}

/// Two-tier lockout keyed by (user, action).
#[derive(Debug)]
pub struct EscalatingLockout {
    records: HashMap<(UserId, ActionType), LockoutRecord>,
    config: LockoutConfig,
}

impl EscalatingLockout {
    /// Create a lockout with the given policy.
    ///
    /// # Panics
    /// Panics if `block_duration_ms` is zero (a zero block could never
    /// satisfy `blocked_until > last_attempt`).
    #[must_use]
    pub fn new(config: LockoutConfig) -> Self {
        assert!(
            config.block_duration_ms > 0,
            "EscalatingLockout block_duration_ms must be > 0"
        );
        Self {
            records: HashMap::new(),
            config,
        }
    }

    /// The policy this lockout enforces.
    #[must_use]
    pub fn config(&self) -> LockoutConfig {
        self.config
    }

    /// Record an attempt at `now_ms` and decide whether it may proceed.
    pub fn can_perform(&mut self, user_id: UserId, action: ActionType, now_ms: u64) -> bool {
        let config = self.config;
        let Some(record) = self.records.get_mut(&(user_id, action)) else {
            self.records
                .insert((user_id, action), LockoutRecord::first(now_ms));
            return true;
        };

        if record.blocked {
            if now_ms < record.blocked_until {
                return false;
            }
            *record = LockoutRecord::first(now_ms);
            tracing::info!(user = %user_id, action = %action, "Lockout expired");
            return true;
        }

        if now_ms.saturating_sub(record.last_attempt) > config.reset_interval_ms {
            *record = LockoutRecord::first(now_ms);
            return true;
        }

        record.count += 1;
        record.last_attempt = now_ms;
        if record.count > config.max_attempts {
            record.blocked = true;
            record.blocked_until = now_ms.saturating_add(config.block_duration_ms);
            tracing::warn!(
                user = %user_id,
                action = %action,
                attempts = record.count,
                blocked_until = record.blocked_until,
                "Lockout engaged"
            );
            return false;
        }
        true
    }

    /// If currently blocked, the instant the block lifts. Read-only.
    #[must_use]
    pub fn blocked_until(&self, user_id: UserId, action: ActionType, now_ms: u64) -> Option<u64> {
        self.records
            .get(&(user_id, action))
            .filter(|r| r.blocked && now_ms < r.blocked_until)
            .map(|r| r.blocked_until)
    }

    /// Current state for (user, action). Read-only.
    #[must_use]
    pub fn record(&self, user_id: UserId, action: ActionType) -> Option<LockoutRecord> {
        self.records.get(&(user_id, action)).copied()
    }

    /// Drop records that are neither blocked nor inside a reset interval.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let reset = self.config.reset_interval_ms;
        let before = self.records.len();
        self.records.retain(|_, r| {
            if r.blocked {
                now_ms < r.blocked_until
            } else {
                now_ms.saturating_sub(r.last_attempt) <= reset
            }
        });
        before - self.records.len()
    }
}

impl Default for EscalatingLockout {
    fn default() -> Self {
        Self::new(LockoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;
    const BLOCK: u64 = 300_000;

    fn lockout() -> EscalatingLockout {
        EscalatingLockout::new(LockoutConfig {
            max_attempts: 5,
            reset_interval_ms: MIN,
            block_duration_ms: BLOCK,
        })
    }

    #[test]
    fn sixth_attempt_blocks_then_expires() {
        let mut lo = lockout();
        let user = UserId::new();
        let t0 = 10_000_000;

        for i in 0..5 {
            assert!(lo.can_perform(user, ActionType::SellAll, t0 + i * 1_000));
        }
        assert!(!lo.can_perform(user, ActionType::SellAll, t0 + 5_000));
        let rec = lo.record(user, ActionType::SellAll).unwrap();
        assert!(rec.blocked);
        assert_eq!(rec.blocked_until, t0 + 5_000 + BLOCK);
        assert!(rec.blocked_until > rec.last_attempt);

        // Any attempt inside the block is denied without touching state.
        assert!(!lo.can_perform(user, ActionType::SellAll, t0 + 5_000 + BLOCK - 1));
        assert_eq!(lo.record(user, ActionType::SellAll).unwrap(), rec);

        // First attempt after the block is allowed and starts over at 1.
        assert!(lo.can_perform(user, ActionType::SellAll, t0 + 5_000 + BLOCK));
        let rec = lo.record(user, ActionType::SellAll).unwrap();
        assert!(!rec.blocked);
        assert_eq!(rec.count, 1);
    }

    #[test]
    fn quiet_period_resets_count() {
        let mut lo = lockout();
        let user = UserId::new();
        for i in 0..5 {
            assert!(lo.can_perform(user, ActionType::SellItem, i));
        }
        // More than a reset interval after the last attempt.
        assert!(lo.can_perform(user, ActionType::SellItem, 4 + MIN + 1));
        assert_eq!(lo.record(user, ActionType::SellItem).unwrap().count, 1);
    }

    #[test]
    fn exactly_reset_interval_still_counts() {
        let mut lo = lockout();
        let user = UserId::new();
        assert!(lo.can_perform(user, ActionType::SellItem, 0));
        assert!(lo.can_perform(user, ActionType::SellItem, MIN));
        assert_eq!(lo.record(user, ActionType::SellItem).unwrap().count, 2);
    }

    #[test]
    fn users_and_actions_are_isolated() {
        let mut lo = lockout();
        let alice = UserId::new();
        let bob = UserId::new();
        for i in 0..6 {
            lo.can_perform(alice, ActionType::SellAll, i);
        }
        assert!(lo.blocked_until(alice, ActionType::SellAll, 10).is_some());
        assert!(lo.can_perform(alice, ActionType::OpenCase, 10));
        assert!(lo.can_perform(bob, ActionType::SellAll, 10));
    }

    #[test]
    fn sweep_keeps_active_blocks() {
        let mut lo = lockout();
        let blocked = UserId::new();
        let idle = UserId::new();
        for i in 0..6 {
            lo.can_perform(blocked, ActionType::SellAll, i);
        }
        lo.can_perform(idle, ActionType::SellAll, 0);

        assert_eq!(lo.sweep(2 * MIN), 1);
        assert!(lo.record(idle, ActionType::SellAll).is_none());
        assert!(lo.record(blocked, ActionType::SellAll).is_some());
    }

    #[test]
    #[should_panic(expected = "block_duration_ms must be > 0")]
    fn zero_block_panics() {
        let _ = EscalatingLockout::new(LockoutConfig {
            max_attempts: 1,
            reset_interval_ms: 1,
            block_duration_ms: 0,
        });
    }
}
