//! # Admission integration tests
//!
//! Each test plays an impatient or hostile client against the admission
//! components wired together the way the coordinator uses them:
//!
//! | Client behaviour        | Component that stops it             |
//! |-------------------------|-------------------------------------|
//! | Click spam              | `Gesture` latch                     |
//! | Scripted request bursts | `SlidingWindowLimiter`              |
//! | Sustained abuse         | `EscalatingLockout`                 |
//! | Reload mid-request      | `SessionGuard` + `FileSessionStore` |

use std::sync::Arc;

use casegate_guard::{
    EscalatingLockout, FileSessionStore, Gesture, LatchState, MemorySessionStore, SessionGuard,
    SlidingWindowLimiter,
};
use casegate_types::{ActionType, CaseId, CasegateError, LockoutConfig, UserId};

const T0: u64 = 1_700_000_000_000;
const MINUTE: u64 = 60_000;

/// Limiter first, then lockout, then latch, as the coordinator orders them.
fn admit(
    limiter: &mut SlidingWindowLimiter,
    lockout: &mut EscalatingLockout,
    gesture: &Gesture,
    user: UserId,
    now: u64,
) -> Result<(), CasegateError> {
    let key = format!("{user}:{}", ActionType::SellAll);
    if !limiter.is_allowed(&key, 5, MINUTE, now) {
        return Err(CasegateError::RateLimited {
            action: ActionType::SellAll,
            retry_after_ms: limiter.retry_after_ms(&key, 5, MINUTE, now),
        });
    }
    if !lockout.can_perform(user, ActionType::SellAll, now) {
        return Err(CasegateError::LockedOut {
            action: ActionType::SellAll,
            retry_after_ms: lockout
                .blocked_until(user, ActionType::SellAll, now)
                .map_or(0, |until| until - now),
        });
    }
    gesture.try_begin()
}

#[test]
fn click_spam_on_one_gesture_admits_once() {
    let mut limiter = SlidingWindowLimiter::new();
    let mut lockout = EscalatingLockout::new(LockoutConfig::default());
    let gesture = Gesture::new();
    let user = UserId::new();

    assert!(admit(&mut limiter, &mut lockout, &gesture, user, T0).is_ok());
    for i in 1..5 {
        let err = admit(&mut limiter, &mut lockout, &gesture, user, T0 + i).unwrap_err();
        assert_eq!(err, CasegateError::GestureInFlight);
    }
    gesture.succeed().unwrap();
    assert_eq!(gesture.state().unwrap(), LatchState::Done);

    // The limiter already spent its budget on the spam; the next click is
    // throttled before the latch is even consulted.
    let err = admit(&mut limiter, &mut lockout, &Gesture::new(), user, T0 + 10).unwrap_err();
    assert!(matches!(err, CasegateError::RateLimited { .. }));
}

#[test]
fn limiter_outpaces_lockout_at_defaults() {
    let mut limiter = SlidingWindowLimiter::new();
    let mut lockout = EscalatingLockout::new(LockoutConfig::default());
    let user = UserId::new();

    for i in 0..5 {
        let gesture = Gesture::new();
        admit(&mut limiter, &mut lockout, &gesture, user, T0 + i * 1_000).unwrap();
        gesture.release().unwrap();
    }
    let err = admit(&mut limiter, &mut lockout, &Gesture::new(), user, T0 + 5_000).unwrap_err();
    assert_eq!(
        err,
        CasegateError::RateLimited {
            action: ActionType::SellAll,
            retry_after_ms: MINUTE - 5_000,
        }
    );
    // A throttled attempt never reaches the lockout.
    assert_eq!(lockout.record(user, ActionType::SellAll).unwrap().count, 5);
    assert!(!lockout.record(user, ActionType::SellAll).unwrap().blocked);
}

#[test]
fn reload_mid_request_reattaches_to_live_session() {
    let path = std::env::temp_dir().join(format!("casegate-admission-{}.json", uuid::Uuid::now_v7()));
    let user = UserId::new();
    let case = CaseId::new();

    let before = SessionGuard::open(FileSessionStore::new(&path), 600_000, T0).unwrap();
    let token = before.begin(user, case.0, T0).unwrap();
    drop(before);

    let after = SessionGuard::open(FileSessionStore::new(&path), 600_000, T0 + 5_000).unwrap();
    assert_eq!(
        after.begin(user, case.0, T0 + 5_000).unwrap_err(),
        CasegateError::SessionInFlight {
            session_id: token.session_id
        }
    );
    after.consume(token.session_id).unwrap();
    assert!(after.begin(user, case.0, T0 + 6_000).is_ok());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn token_lives_through_ttl_boundary_only() {
    let store = Arc::new(MemorySessionStore::new());
    let guard = SessionGuard::open(Arc::clone(&store), 600_000, T0).unwrap();
    let user = UserId::new();
    let case = CaseId::new();

    let token = guard.begin(user, case.0, T0).unwrap();
    assert_eq!(guard.live(user, case.0, T0 + 600_000).unwrap(), Some(token.clone()));
    assert!(matches!(
        guard.begin(user, case.0, T0 + 600_000),
        Err(CasegateError::SessionInFlight { .. })
    ));

    assert_eq!(guard.live(user, case.0, T0 + 600_001).unwrap(), None);
    let fresh = guard.begin(user, case.0, T0 + 600_001).unwrap();
    assert_ne!(fresh.session_id, token.session_id);
}
