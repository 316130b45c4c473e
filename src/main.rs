//! Module Persistence demo
//!
//! Registers a few demo modules, loads them in dependency order, simulates
//! play by mutating state and requesting saves, and autosaves in the
//! background. Ctrl+C or SIGTERM runs a final flush before exiting.

mod demo;

use demo::{GameProgress, PlayerStats, Settings};
use futures_util::StreamExt;
use module_persistence::{autosave, Config, PersistenceEvent, PersistenceOrchestrator};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let orchestrator = PersistenceOrchestrator::from_config(&config).await?;
    spawn_event_logger(&orchestrator);

    orchestrator.register_module(Settings::default()).await?;
    orchestrator.register_module(PlayerStats::default()).await?;
    orchestrator.register_module(GameProgress::default()).await?;

    let report = orchestrator.load_all().await?;
    info!(
        order = ?report.order,
        loaded = report.loaded.len(),
        fresh = report.not_found.len(),
        "Modules ready"
    );
    for (module_id, error) in &report.failed {
        warn!(module_id = %module_id, error = %error, "Module kept its default state");
    }

    let autosave = config
        .autosave_interval
        .map(|interval| autosave::spawn(orchestrator.clone(), interval));

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        result = simulate_play(&orchestrator) => {
            if let Err(e) = result {
                error!(error = %e, "Simulation stopped");
            }
        }
        _ = shutdown_signal() => {}
    }

    if let Some(handle) = autosave {
        handle.stop();
    }

    match orchestrator.shutdown(config.shutdown_flush_timeout).await? {
        Some(report) => info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            "Final state saved"
        ),
        None => info!("Nothing left to save"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Mutate module state every few seconds and request saves
async fn simulate_play(orchestrator: &PersistenceOrchestrator) -> anyhow::Result<()> {
    let stats = orchestrator
        .get_module::<PlayerStats>()
        .await
        .ok_or_else(|| anyhow::anyhow!("PlayerStats is not registered"))?;
    let progress = orchestrator
        .get_module::<GameProgress>()
        .await
        .ok_or_else(|| anyhow::anyhow!("GameProgress is not registered"))?;

    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    let mut round: u32 = 0;
    loop {
        ticker.tick().await;
        round += 1;

        {
            let mut stats = stats.write().await;
            stats.gain(250);
            stats.play_time_secs += 3;
        }
        orchestrator.request_save("PlayerStats").await?;

        if round % 4 == 0 {
            let mut progress = progress.write().await;
            let level = format!("level-{}", progress.completed_levels.len() + 1);
            progress.completed_levels.push(level.clone());
            progress.checkpoint = level;
            drop(progress);
            orchestrator.request_save("GameProgress").await?;
        }
    }
}

fn spawn_event_logger(orchestrator: &PersistenceOrchestrator) {
    let mut events = orchestrator.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(PersistenceEvent::BatchSaved(report)) => info!(
                    flush_id = %report.flush_id,
                    saved = ?report.saved,
                    failed = report.failed.len(),
                    "Batch saved"
                ),
                Ok(event) => debug!(event = event.kind(), "Persistence event"),
                Err(e) => warn!(error = %e, "Event logger lagged"),
            }
        }
    });
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, saving and shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, saving and shutting down...");
        },
    }
}
