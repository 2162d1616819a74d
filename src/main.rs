use std::{path::PathBuf, sync::Arc};

use cardroll::{
    cards::{content, Rarity},
    ledger::InMemoryLedger,
    roll::{AutoRollConfig, AutoRollProgress, PityState, RollKind, RollOrchestrator},
    Res, RollEngine,
};
use tokio::sync::mpsc;
use uuid::Uuid;

async fn run(catalog: PathBuf, config: PathBuf, balance: u64, seed: Option<u64>) -> Res<()> {
    let catalog = content::load_catalog(&catalog).await?;
    let config = content::load_config(&config).await?;
    let currency = config.profile(RollKind::Standard)?.currency;

    let player = Uuid::new_v4();
    let ledger = Arc::new(InMemoryLedger::with_balance(player, currency, balance));
    let orchestrator = RollOrchestrator::new(Arc::new(catalog), Arc::new(config), ledger)?;
    let engine = match seed {
        Some(seed) => RollEngine::with_seed(orchestrator, seed),
        None => RollEngine::new(orchestrator),
    };
    engine.open_session(player, PityState::default())?;
    tracing::info!("Rolling for {player} with {balance} {currency:?}.");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = engine.start_auto_roll(
        player,
        RollKind::Standard,
        AutoRollConfig {
            max_rolls: 100,
            stop_on_rarity: Rarity::Legendary,
            batch_size: 10,
        },
        tx,
    )?;

    while let Some(event) = rx.recv().await {
        match event {
            AutoRollProgress::Rolled(result) => tracing::info!(
                "Drew {} ({}).",
                result.card.name(),
                result.rarity_drawn.as_str()
            ),
            AutoRollProgress::BatchCompleted { completed } => {
                tracing::info!("{completed} rolls done.")
            }
            AutoRollProgress::Finished(_) => {}
        }
    }

    let result = handle.finished().await?;
    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("Failed to JSON encode result: {e}"),
    }

    let pity = engine.close_session(player).await?;
    tracing::debug!("Final pity state: {pity:?}");
    Ok(())
}

#[tokio::main]
async fn main() {
    const USAGE: &str = "Usage: cardroll <catalog path> <config path> <balance> [seed]";

    let catalog = std::env::args().nth(1).expect(USAGE);
    let config = std::env::args().nth(2).expect(USAGE);
    let balance = std::env::args()
        .nth(3)
        .map(|s| s.parse::<u64>().expect(&format!("Invalid balance: {s}")))
        .expect(USAGE);
    let seed = std::env::args()
        .nth(4)
        .map(|s| s.parse::<u64>().expect(&format!("Invalid seed: {s}")));

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    if let Err(e) = run(PathBuf::from(catalog), PathBuf::from(config), balance, seed).await {
        eprintln!("Roll failed: {e}");
        std::process::exit(1);
    }
}
