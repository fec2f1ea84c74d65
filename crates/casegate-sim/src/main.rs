//! # casegate-sim
//!
//! Drives one scripted user session through the [`ActionCoordinator`]
//! against an [`InMemoryLedger`] and prints the resulting audit trail to
//! stdout, one JSON entry per line.
//!
//! ```text
//! casegate-sim [config.json]
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the default `info` filter and
//! `CASEGATE_LOG_JSON=1` switches them to JSON.

use std::{env, process::ExitCode, sync::Arc, time::Duration};

use casegate_exec::{ActionCoordinator, CaseDefinition, CaseOpening, InMemoryLedger};
use casegate_guard::Gesture;
use casegate_types::{
    CaseId, CasegateConfig, CasegateError, CoinRewardId, OpenCaseRequest, Rarity, Result,
    RewardItem, RewardRef, SkinId, UserId, constants,
};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

/// Simulated round-trip time of every ledger call.
const LEDGER_LATENCY: Duration = Duration::from_millis(40);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("CASEGATE_LOG_JSON").is_ok_and(|v| v == "1");
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn load_config() -> Result<CasegateConfig> {
    match env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "Loading config");
            CasegateConfig::load(&path)
        }
        None => Ok(CasegateConfig::default()),
    }
}

fn skin(name: &str, rarity: Rarity, price: i64) -> RewardItem {
    RewardItem {
        id: RewardRef::Skin(SkinId::new()),
        display_name: name.to_string(),
        rarity,
        monetary_value: Decimal::new(price, 0),
    }
}

fn coins(amount: i64) -> RewardItem {
    RewardItem {
        id: RewardRef::Coin(CoinRewardId::new()),
        display_name: format!("{amount} coins"),
        rarity: Rarity::Common,
        monetary_value: Decimal::new(amount, 0),
    }
}

fn describe<T>(outcome: &Result<T>) -> String {
    match outcome {
        Ok(_) => "dispatched".to_string(),
        Err(err) => err.to_string(),
    }
}

async fn run() -> Result<()> {
    let config = load_config()?;
    let ledger = Arc::new(InMemoryLedger::new().with_latency(LEDGER_LATENCY));
    let user = UserId::new();
    let case = CaseId::new();

    ledger.set_balance(user, Decimal::new(100, 0));
    ledger.add_case(
        case,
        CaseDefinition {
            price: Decimal::new(10, 0),
            strip: vec![
                skin("P250 | Sand Dune", Rarity::Common, 1),
                skin("MP7 | Armor Core", Rarity::Uncommon, 4),
                coins(15),
                skin("AWP | Pit Viper", Rarity::Rare, 18),
                skin("AK-47 | Fire Serpent", Rarity::Legendary, 250),
            ],
        },
    );
    ledger.grant_item(user, "Glock-18 | Candy Apple", Rarity::Uncommon, Decimal::new(4, 0));

    let coord = ActionCoordinator::new(Arc::clone(&ledger), config)?;
    let request = OpenCaseRequest::paid(user, case);

    // One opening, walked through to the revealed reward.
    let opening = CaseOpening::new();
    let result = opening.submit(&coord, &request).await?;
    tracing::info!(
        session = %result.session_id,
        winner = result.winner_index,
        reward = result.reward.as_ref().map_or("-", |r| r.display_name.as_str()),
        balance = %result.new_balance,
        "Case opened"
    );
    opening.finish_animation()?;

    // A double click: two triggers on one gesture while the first is in flight.
    let double = CaseOpening::new();
    let (first, second) = tokio::join!(
        double.submit(&coord, &request),
        double.submit(&coord, &request)
    );
    tracing::info!(first = %describe(&first), second = %describe(&second), "Double trigger");
    if first.is_ok() || second.is_ok() {
        double.finish_animation()?;
    }

    // A free case without the ad never leaves the client.
    let free = OpenCaseRequest::free(user, case, false);
    if let Err(err) = coord.open_case(&Gesture::new(), &free).await {
        tracing::info!(error = %err, "Free case refused");
    }

    let item = ledger
        .items_of(user)
        .into_iter()
        .find(|i| !i.sold)
        .ok_or_else(|| CasegateError::Internal("no unsold item to sell".to_string()))?;
    let sale = coord.sell_item(&Gesture::new(), user, item.id).await?;
    tracing::info!(item = %item.display_name, balance = %sale.new_balance, "Item sold");

    match coord.sell_all(&Gesture::new(), user).await {
        Ok(tx) => tracing::info!(
            items = tx.items.len(),
            total = %tx.total_value,
            balance = ?tx.new_balance,
            "Inventory sold"
        ),
        Err(CasegateError::NothingToSell) => tracing::info!("Inventory already empty"),
        Err(err) => return Err(err),
    }

    // A bulk sale whose credit is refused gets reverted item by item.
    ledger.grant_item(user, "M4A4 | Howl", Rarity::Legendary, Decimal::new(900, 0));
    ledger.grant_item(user, "Nova | Sand Dune", Rarity::Common, Decimal::new(1, 0));
    ledger.reject_credit(Some("ledger maintenance"));
    match coord.sell_all(&Gesture::new(), user).await {
        Err(err) => tracing::warn!(error = %err, "Bulk sale reverted"),
        Ok(_) => {
            return Err(CasegateError::Internal(
                "refused credit was not surfaced".to_string(),
            ));
        }
    }
    ledger.reject_credit(None);

    let projection = coord.refresh_projection(user).await?;
    tracing::info!(
        balance = %projection.balance,
        unsold = projection.unsold_items.len(),
        "Final projection"
    );

    coord.verify_audit()?;
    for entry in coord.audit_entries()? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    tracing::info!(high_risk = coord.high_risk_entries()?.len(), "Audit trail verified");
    coord.shutdown()
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    tracing::info!(
        engine = constants::ENGINE_NAME,
        version = constants::VERSION,
        "Starting session simulator"
    );

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Simulation failed");
            ExitCode::FAILURE
        }
    }
}
