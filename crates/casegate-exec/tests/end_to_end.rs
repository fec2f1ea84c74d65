//! End-to-end tests through the coordinator.
//!
//! Every scenario drives the full pipeline against an [`InMemoryLedger`]:
//! validation → limiter → lockout → gesture latch → session token → ledger
//! → audit trail. Time is a [`ManualClock`] except where tokio timers are
//! involved.

use std::{sync::Arc, time::Duration};

use casegate_exec::{
    ActionCoordinator, CaseDefinition, CaseOpening, InMemoryLedger, LedgerCall, PhaseKind,
};
use casegate_guard::{FileSessionStore, Gesture, MemorySessionStore, SessionStore};
use casegate_types::{
    ActionType, CaseId, CasegateConfig, CasegateError, Clock, ErrorKind, ManualClock,
    OpenCaseRequest, RateLimitConfig, Rarity, RewardItem, RiskLevel, UserId,
};
use rand::Rng;
use rust_decimal::Decimal;
use tokio::task::JoinSet;

const T0: u64 = 1_700_000_000_000;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// Ledger, clock and coordinator for one user with 100 coins and one case.
struct World {
    ledger: Arc<InMemoryLedger>,
    clock: Arc<ManualClock>,
    coord: ActionCoordinator<InMemoryLedger>,
    user: UserId,
    case: CaseId,
}

impl World {
    fn new(config: CasegateConfig) -> Self {
        Self::with_store(config, Arc::new(MemorySessionStore::new()))
    }

    fn with_store(config: CasegateConfig, store: Arc<dyn SessionStore>) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::at(T0));
        let user = UserId::new();
        let case = CaseId::new();
        ledger.set_balance(user, dec(100));
        ledger.add_case(case, weapon_case());
        let coord = ActionCoordinator::with_parts(Arc::clone(&ledger), config, clock.clone(), store)
            .expect("coordinator");
        Self {
            ledger,
            clock,
            coord,
            user,
            case,
        }
    }

    fn open_request(&self) -> OpenCaseRequest {
        OpenCaseRequest::paid(self.user, self.case)
    }
}

fn weapon_case() -> CaseDefinition {
    CaseDefinition {
        price: dec(10),
        strip: vec![
            RewardItem::dummy_skin("AK-47 | Safari Mesh", Rarity::Common, dec(2)),
            RewardItem::dummy_skin("M4A1-S | Nitro", Rarity::Rare, dec(12)),
            RewardItem::dummy_coins(dec(25)),
        ],
    }
}

// =========================================================================
// At-most-once dispatch per gesture
// =========================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_on_one_gesture_reach_ledger_once() {
    let ledger = Arc::new(InMemoryLedger::new().with_latency(Duration::from_millis(250)));
    let user = UserId::new();
    let case = CaseId::new();
    ledger.set_balance(user, dec(100));
    ledger.add_case(case, weapon_case());
    let coord = Arc::new(
        ActionCoordinator::new(Arc::clone(&ledger), CasegateConfig::default()).expect("coordinator"),
    );
    let request = OpenCaseRequest::paid(user, case);
    let opening = Arc::new(CaseOpening::new());

    let k = rand::thread_rng().gen_range(2..=12);
    let mut triggers = JoinSet::new();
    for _ in 0..k {
        let coord = Arc::clone(&coord);
        let opening = Arc::clone(&opening);
        let request = request.clone();
        triggers.spawn(async move { opening.submit(&coord, &request).await });
    }

    let mut succeeded = 0;
    while let Some(joined) = triggers.join_next().await {
        match joined.expect("trigger task") {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Duplicate, "unexpected {err}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(ledger.calls(LedgerCall::OpenCase), 1);
    assert_eq!(opening.kind().unwrap(), PhaseKind::Resolving);

    // Late triggers after the result are refused without a ledger call.
    for _ in 0..3 {
        let err = opening.submit(&coord, &request).await.unwrap_err();
        assert_eq!(err, CasegateError::GestureCompleted);
    }
    assert_eq!(ledger.calls(LedgerCall::OpenCase), 1);

    // Every attempt left exactly one audit entry.
    let entries = coord.audit_entries().unwrap();
    assert_eq!(entries.len(), k + 3);
    assert_eq!(entries.iter().filter(|e| e.success).count(), 1);
    coord.verify_audit().unwrap();
    coord.shutdown().unwrap();
}

#[tokio::test]
async fn fresh_gesture_may_open_again() {
    let w = World::new(CasegateConfig::default());
    let request = w.open_request();

    w.coord.open_case(&Gesture::new(), &request).await.unwrap();
    w.coord.open_case(&Gesture::new(), &request).await.unwrap();
    assert_eq!(w.ledger.calls(LedgerCall::OpenCase), 2);
}

// =========================================================================
// Sliding window
// =========================================================================

#[tokio::test]
async fn sixth_sale_in_window_is_throttled_until_first_ages_out() {
    let config = CasegateConfig {
        sell_item_limit: RateLimitConfig {
            max_requests: 5,
            window_ms: 60_000,
        },
        ..CasegateConfig::default()
    };
    let w = World::new(config);
    let items: Vec<_> = (0..7)
        .map(|i| w.ledger.grant_item(w.user, &format!("skin-{i}"), Rarity::Common, dec(1)))
        .collect();

    for item in &items[..5] {
        w.coord.sell_item(&Gesture::new(), w.user, *item).await.unwrap();
        w.clock.advance(1_000);
    }

    w.clock.set(T0 + 59_999);
    let err = w.coord.sell_item(&Gesture::new(), w.user, items[5]).await.unwrap_err();
    assert_eq!(
        err,
        CasegateError::RateLimited {
            action: ActionType::SellItem,
            retry_after_ms: 1,
        }
    );
    assert_eq!(w.ledger.calls(LedgerCall::SellItem), 5);
    assert_eq!(w.coord.remaining_requests(w.user, ActionType::SellItem).unwrap(), 0);

    w.clock.set(T0 + 60_000);
    w.coord.sell_item(&Gesture::new(), w.user, items[5]).await.unwrap();
    assert_eq!(w.ledger.calls(LedgerCall::SellItem), 6);

    let throttled = w
        .coord
        .audit_entries()
        .unwrap()
        .into_iter()
        .find(|e| !e.success)
        .expect("throttled entry");
    assert!(throttled.risk_level >= RiskLevel::Medium);
    assert_eq!(throttled.details["dispatched"], false);
}

// =========================================================================
// Escalating lockout
// =========================================================================

#[tokio::test]
async fn bulk_sale_lockout_blocks_then_resets() {
    // Keep the limiter out of the way so only the lockout decides.
    let config = CasegateConfig {
        sell_all_limit: RateLimitConfig::per_minute(100),
        ..CasegateConfig::default()
    };
    let w = World::new(config);

    // Attempts 1-5 pass admission; with nothing to sell they fail at the ledger.
    for _ in 0..5 {
        let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
        assert_eq!(err, CasegateError::NothingToSell);
        w.clock.advance(1_000);
    }

    let sixth_at = w.clock.now_ms();
    let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
    assert_eq!(
        err,
        CasegateError::LockedOut {
            action: ActionType::SellAll,
            retry_after_ms: 300_000,
        }
    );

    w.clock.set(sixth_at + 299_999);
    let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
    assert_eq!(err.retry_after_ms(), Some(1));
    assert_eq!(w.ledger.calls(LedgerCall::FetchUnsoldItems), 5);

    // First attempt after the block is allowed and counts as attempt 1.
    w.clock.set(sixth_at + 300_000);
    for _ in 0..5 {
        let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
        assert_eq!(err, CasegateError::NothingToSell);
    }
    let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Throttled);
    assert_eq!(w.ledger.calls(LedgerCall::FetchUnsoldItems), 10);

    let entries = w.coord.audit_entries().unwrap();
    let locked: Vec<_> = entries
        .iter()
        .filter(|e| e.details["error"].as_str().is_some_and(|m| m.starts_with("CG_ERR_201")))
        .collect();
    assert_eq!(locked.len(), 3);
    assert!(locked.iter().all(|e| !e.success && e.risk_level == RiskLevel::High));
}

// =========================================================================
// Bulk sale saga
// =========================================================================

#[tokio::test]
async fn bulk_sale_credits_sum_of_captured_prices() {
    let w = World::new(CasegateConfig::default());
    let mut rng = rand::thread_rng();
    let prices: Vec<i64> = (0..rng.gen_range(1..=20)).map(|_| rng.gen_range(1..=500)).collect();
    for (i, price) in prices.iter().enumerate() {
        w.ledger.grant_item(w.user, &format!("skin-{i}"), Rarity::Uncommon, dec(*price));
    }
    let expected = dec(100) + dec(prices.iter().sum());

    let tx = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap();
    assert!(tx.committed);
    assert_eq!(tx.items.len(), prices.len());
    assert_eq!(tx.new_balance, Some(expected));
    assert_eq!(w.ledger.balance(w.user), expected);
    assert!(w.ledger.items_of(w.user).iter().all(|i| i.sold));
    assert_eq!(w.ledger.calls(LedgerCall::AdjustBalance), 1);
}

#[tokio::test]
async fn failed_credit_reverts_every_committed_item() {
    let w = World::new(CasegateConfig::default());
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(1..=20);
    for i in 0..count {
        w.ledger
            .grant_item(w.user, &format!("skin-{i}"), Rarity::Rare, dec(rng.gen_range(1..=500)));
    }
    w.ledger.reject_credit(Some("ledger maintenance"));

    let gesture = Gesture::new();
    let err = w.coord.sell_all(&gesture, w.user).await.unwrap_err();
    assert!(matches!(err, CasegateError::CreditFailed { reverted, .. } if reverted == count));
    assert_eq!(w.ledger.balance(w.user), dec(100));
    assert!(w.ledger.items_of(w.user).iter().all(|i| !i.sold && i.sold_price.is_none()));
    assert_eq!(w.ledger.calls(LedgerCall::MarkItemUnsold), count);

    // The gesture is released: the user may try again once the ledger recovers.
    w.ledger.reject_credit(None);
    let tx = w.coord.sell_all(&gesture, w.user).await.unwrap();
    assert!(tx.committed);
}

#[tokio::test]
async fn failed_compensation_is_escalated() {
    let w = World::new(CasegateConfig::default());
    w.ledger.grant_item(w.user, "Desert Eagle | Blaze", Rarity::Epic, dec(40));
    w.ledger.reject_credit(Some("ledger maintenance"));
    w.ledger.reject_unsold(true);

    let err = w.coord.sell_all(&Gesture::new(), w.user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compensation);
    assert!(matches!(err, CasegateError::CompensationFailed { ref unreverted, .. } if unreverted.len() == 1));

    let high = w.coord.high_risk_entries().unwrap();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].action, ActionType::SellAll);
    assert_eq!(high[0].details["committed"], false);
}

// =========================================================================
// Session tokens
// =========================================================================

#[tokio::test]
async fn session_token_blocks_through_ttl_boundary() {
    let w = World::new(CasegateConfig::default());
    let request = w.open_request();
    w.ledger.fail_transport(LedgerCall::OpenCase, 1);

    let err = w.coord.open_case(&Gesture::new(), &request).await.unwrap_err();
    assert!(err.is_indeterminate());
    let token = w.coord.live_session(w.user, w.case).unwrap().expect("live token");
    assert_eq!(token.created_at_ms, T0);

    w.clock.set(T0 + 600_000);
    let err = w.coord.open_case(&Gesture::new(), &request).await.unwrap_err();
    assert_eq!(
        err,
        CasegateError::SessionInFlight {
            session_id: token.session_id
        }
    );
    assert_eq!(w.ledger.calls(LedgerCall::OpenCase), 1);

    w.clock.set(T0 + 600_001);
    assert!(w.coord.live_session(w.user, w.case).unwrap().is_none());
    let result = w.coord.open_case(&Gesture::new(), &request).await.unwrap();
    assert_ne!(result.session_id, token.session_id);
    assert_eq!(w.ledger.calls(LedgerCall::OpenCase), 2);
}

#[tokio::test]
async fn session_survives_reload_from_file() {
    let path = std::env::temp_dir().join(format!("casegate-e2e-{}.json", uuid::Uuid::now_v7()));
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&path));

    let first = World::with_store(CasegateConfig::default(), Arc::clone(&store));
    first.ledger.fail_transport(LedgerCall::OpenCase, 1);
    let err = first
        .coord
        .open_case(&Gesture::new(), &first.open_request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    let token = first
        .coord
        .live_session(first.user, first.case)
        .unwrap()
        .expect("live token");

    // A "reloaded page": new coordinator, new ledger handle, same file.
    let reloaded = ActionCoordinator::with_parts(
        Arc::clone(&first.ledger),
        CasegateConfig::default(),
        first.clock.clone(),
        Arc::new(FileSessionStore::new(&path)),
    )
    .unwrap();
    assert_eq!(
        reloaded.live_session(first.user, first.case).unwrap(),
        Some(token.clone())
    );
    let err = reloaded
        .open_case(&Gesture::new(), &first.open_request())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CasegateError::SessionInFlight {
            session_id: token.session_id
        }
    );
    assert_eq!(first.ledger.calls(LedgerCall::OpenCase), 1);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test(start_paused = true)]
async fn second_tab_sees_first_tabs_in_flight_opening() {
    let ledger = Arc::new(InMemoryLedger::new().with_latency(Duration::from_millis(250)));
    let clock = Arc::new(ManualClock::at(T0));
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let user = UserId::new();
    let case = CaseId::new();
    ledger.set_balance(user, dec(100));
    ledger.add_case(case, weapon_case());

    let tab = || {
        ActionCoordinator::with_parts(
            Arc::clone(&ledger),
            CasegateConfig::default(),
            clock.clone(),
            Arc::clone(&store),
        )
        .expect("coordinator")
    };
    let (first_tab, second_tab) = (tab(), tab());
    let request = OpenCaseRequest::paid(user, case);

    let (first_gesture, second_gesture) = (Gesture::new(), Gesture::new());
    let (first, second) = tokio::join!(
        first_tab.open_case(&first_gesture, &request),
        second_tab.open_case(&second_gesture, &request)
    );
    let first = first.expect("first tab opens");
    assert_eq!(
        second.unwrap_err(),
        CasegateError::SessionInFlight {
            session_id: first.session_id
        }
    );
    assert_eq!(ledger.calls(LedgerCall::OpenCase), 1);

    // Once the first tab consumed its token the second may open.
    assert!(second_tab.open_case(&Gesture::new(), &request).await.is_ok());
}

// =========================================================================
// Case-opening state machine
// =========================================================================

#[tokio::test]
async fn case_opening_walks_init_to_result() {
    let w = World::new(CasegateConfig::default());
    let request = w.open_request();
    let opening = CaseOpening::new();

    w.ledger.reject_open_case(Some("insufficient balance"));
    let err = opening.submit(&w.coord, &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejection);
    assert_eq!(opening.kind().unwrap(), PhaseKind::Init);
    assert_eq!(opening.last_error().unwrap(), Some(err));

    w.ledger.reject_open_case(None);
    let result = opening.submit(&w.coord, &request).await.unwrap();
    assert_eq!(opening.kind().unwrap(), PhaseKind::Resolving);
    assert!(result.is_consistent());
    assert_eq!(result.winner(), result.reward.as_ref());

    assert_eq!(opening.finish_animation().unwrap(), result);
    assert_eq!(opening.kind().unwrap(), PhaseKind::Result);
    assert!(opening.finish_animation().is_err());
    assert_eq!(opening.kind().unwrap(), PhaseKind::Result);
    assert_eq!(w.ledger.calls(LedgerCall::OpenCase), 2);
}

#[tokio::test(start_paused = true)]
async fn projection_refetches_after_action() {
    let w = World::new(CasegateConfig::default());
    let item = w.ledger.grant_item(w.user, "USP-S | Orion", Rarity::Epic, dec(30));

    let before = w.coord.refresh_projection(w.user).await.unwrap();
    assert_eq!(before.balance, dec(100));
    assert_eq!(before.unsold_items.len(), 1);

    w.coord.sell_item(&Gesture::new(), w.user, item).await.unwrap();
    assert!(w.coord.projection(w.user).unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(w.coord.config().debounce_ms + 50)).await;
    let after = w.coord.projection(w.user).unwrap().expect("refetched");
    assert_eq!(after.balance, dec(130));
    assert!(after.unsold_items.is_empty());
}
