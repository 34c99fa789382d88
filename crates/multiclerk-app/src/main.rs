// multiclerk entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database
// 4. Create mpsc channels
// 5. Build the application state
// 6. Spawn WebSocket server task
// 7. Spawn coordination task
// 8. Wait for Ctrl+C (or the coordination task ending)
// 9. Cleanup on exit

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use multiclerk_app::app;
use multiclerk_app::bridge::Outbox;
use multiclerk_app::config;
use multiclerk_core::db::Database;
use multiclerk_core::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("multiclerk starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} platforms, production={}, stagger={}ms",
        config.platforms.len(),
        config.coordination.production,
        config.coordination.stagger_ms
    );

    // 3. Open database
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Create mpsc channels
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (out_tx, out_rx) = mpsc::channel(256);

    // 5. Application state
    if config.analytics.enabled {
        info!("Usage analytics enabled ({})", config.analytics.endpoint);
    }
    let app_state = app::AppState::new(config.clone(), db, Outbox::new(out_tx));

    // 6. Spawn WebSocket server task
    let ws_port = config.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx, out_rx).await {
            error!("WebSocket server error on port {}: {:#}", ws_port, e);
        }
    });

    // 7. Spawn coordination task
    let mut app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, app_state).await {
            error!("Coordination loop error: {}", e);
        }
    });

    info!("Ready. Waiting for the bridge on ws://127.0.0.1:{}", ws_port);

    // 8. Run until interrupted
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Interrupt received, shutting down");
        }
        _ = &mut app_handle => {
            info!("Coordination loop ended");
        }
    }

    // 9. Cleanup: stopping the server closes the event channel, which ends
    // the coordination loop.
    ws_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    info!("multiclerk shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (logs/multiclerk.log).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("multiclerk.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("multiclerk=info,multiclerk_app=info,multiclerk_core=info,warn")
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
