//! Contact server - polling-cycle ATC contact correlation and sector occupancy.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contact_server::batch::BatchSettings;
use contact_server::config::Config;
use contact_server::correlator::Correlator;
use contact_server::loops::cycle_loop::{restore_open_records, run_cycle_loop, CycleContext};
use contact_server::persistence::init_database;
use contact_server::state::AppState;
use contact_server::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("contact_server=debug".parse()?))
        .init();

    tracing::info!("Starting contact server...");

    let config = Config::from_env();
    let polling_interval = Duration::from_secs(config.polling_interval_secs);

    let db = init_database(&config.database_path, config.database_max_connections).await?;
    let store = Arc::new(SqliteStore::new(db));

    let state = Arc::new(AppState::new(config.polygon_path.clone(), polling_interval));
    state.load_polygons(config.polygon_policy).await?;

    let restored = restore_open_records(&state, &*store, &*store).await?;
    tracing::info!("Restored {} open occupancy record(s)", restored);

    let correlator = Arc::new(Correlator::new(
        store.clone(),
        config.profile.clone(),
        config.correlation_settings(),
    ));
    let ctx = Arc::new(CycleContext {
        state: state.clone(),
        samples: store.clone(),
        occupancy: store,
        correlator,
        batch: BatchSettings::from_config(&config),
        polling_interval,
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let cycle = tokio::spawn(run_cycle_loop(ctx, shutdown_tx.subscribe()));

    #[cfg(unix)]
    tokio::spawn(reload_on_sighup(state.clone(), shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(());

    cycle.await?;
    let stats = state.cycle_stats();
    tracing::info!(
        "Contact server stopped ({} completed, {} skipped, {} failed cycles)",
        stats.completed,
        stats.skipped,
        stats.failed
    );
    Ok(())
}

#[cfg(unix)]
async fn reload_on_sighup(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("SIGHUP handler unavailable: {}", err);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!("SIGHUP received, reloading {}", state.polygon_path().display());
                state.reload_polygons().await;
            }
        }
    }
}
