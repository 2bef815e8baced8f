//! Offline pipeline driver
//!
//! Runs the full engine against scripted in-memory providers: a short
//! race calendar with plausible per-entry signals, JSON-file persistence
//! and the background scheduler, until Ctrl-C.

use gridcast::config::EngineConfig;
use gridcast::orchestrator::PredictionOrchestrator;
use gridcast::providers::mock::{MockDataProvider, MockResultsProvider};
use gridcast::store::JsonFileStore;
use gridcast::types::Race;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = EngineConfig::from_env();
    // Tight intervals so the demo cycles visibly
    config.orchestrator.collect_interval = Duration::from_secs(10);
    config.orchestrator.predict_interval = Duration::from_secs(20);
    config.orchestrator.reconcile_interval = Duration::from_secs(15);
    config.orchestrator.retrain_check_interval = Duration::from_secs(30);
    config.orchestrator.horizon_min = chrono::Duration::minutes(5);

    let store = Arc::new(JsonFileStore::new(config.store.clone())?);
    let data = Arc::new(MockDataProvider::new());
    let results = Arc::new(MockResultsProvider::new());
    seed_calendar(&data).await;

    let orchestrator = Arc::new(PredictionOrchestrator::new(
        config,
        data.clone(),
        results.clone(),
        store.clone(),
        store,
    ));
    orchestrator.warm_start().await?;

    let runner = orchestrator.clone();
    let handle = tokio::spawn(runner.run());

    tokio::signal::ctrl_c().await?;
    info!("[Pipeline] Ctrl-C received, shutting down");
    orchestrator.shutdown();
    handle.await?;

    let metrics = orchestrator.get_performance_metrics().await;
    info!(
        "[Pipeline] Final: {} active, {} resolved, accuracy {}, degraded={}",
        metrics.active_count, metrics.resolved_count, metrics.accuracy, metrics.degraded
    );
    Ok(())
}

/// Three upcoming races with a ten-entry grid each
async fn seed_calendar(data: &MockDataProvider) {
    let circuits = [("monza", 6i64), ("spa", 24), ("suzuka", 48)];
    for (circuit, hours) in circuits {
        let race_id = format!("race-{circuit}");
        let entries: Vec<String> = (1..=10).map(|n| format!("driver-{n}")).collect();
        data.add_race(Race {
            id: race_id.clone(),
            name: format!("{circuit} grand prix"),
            circuit: circuit.to_string(),
            scheduled_at: Utc::now() + chrono::Duration::hours(hours),
            entries: entries.clone(),
        })
        .await;
        for (grid, entry) in entries.iter().enumerate() {
            data.set_signals(MockDataProvider::plausible_signals(
                &race_id,
                entry,
                grid as u32 + 1,
            ))
            .await;
        }
    }
    info!("[Pipeline] Seeded {} races", circuits.len());
}
