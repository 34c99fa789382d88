// Application state and the coordination event loop.
//
// One task owns `AppState` and consumes WebSocket events from the bridge in
// order. Every inbound frame is routed to the `Coordinator`; whatever it
// returns for the display layer goes out through the `Outbox`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use multiclerk_core::colors::{BidderColors, ColorSource, CyclingPalette, RandomPalette};
use multiclerk_core::coordinator::Coordinator;
use multiclerk_core::db::Database;
use multiclerk_core::dispatch::{Dispatcher, Pacing};
use multiclerk_core::protocol::{CoreMessage, ExtensionMessage};
use multiclerk_core::registry::BiddingRegistry;
use multiclerk_core::ws_server::WsEvent;

use crate::analytics::UsageReporter;
use crate::bridge::{BridgeAdapter, Outbox};
use crate::config::Config;

/// How often the event loop checks for a stale bridge connection.
pub const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

pub struct AppState {
    pub config: Config,
    pub coordinator: Coordinator<BridgeAdapter>,
    pub outbox: Outbox,
    pub connection_status: ConnectionStatus,
    /// Arrival time of the last bridge frame. `None` until a bridge connects.
    pub last_ws_message_time: Option<Instant>,
    pub heartbeat_timeout: Duration,
}

impl AppState {
    pub fn new(config: Config, db: Arc<Database>, outbox: Outbox) -> Self {
        let registry = BiddingRegistry::new(
            config.platforms.clone(),
            config.coordination.production,
        );

        let palette = config.colors.palette.clone();
        let source: Box<dyn ColorSource> = if config.colors.randomize {
            Box::new(RandomPalette::new(palette))
        } else {
            Box::new(CyclingPalette::new(palette))
        };

        let dispatcher = Dispatcher::new(
            BridgeAdapter::new(outbox.clone()),
            Pacing::from_millis(config.coordination.stagger_ms),
        )
        .with_log(UsageReporter::from_config(&config.analytics, db.clone()));

        let heartbeat_timeout = Duration::from_secs(config.coordination.heartbeat_timeout_secs);

        Self {
            coordinator: Coordinator::new(registry, BidderColors::new(source), dispatcher, db),
            outbox,
            connection_status: ConnectionStatus::Disconnected,
            last_ws_message_time: None,
            heartbeat_timeout,
            config,
        }
    }

    fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
        self.outbox
            .set_connected(status == ConnectionStatus::Connected);
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the coordination loop until the WebSocket event channel closes.
pub async fn run(mut ws_rx: mpsc::Receiver<WsEvent>, mut state: AppState) -> anyhow::Result<()> {
    info!("Coordination loop started");

    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_CHECK_INTERVAL);
    // The first tick completes immediately.
    heartbeat_interval.tick().await;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { addr }) => {
                        info!("Bridge connected from {addr}");
                        state.set_connection_status(ConnectionStatus::Connected);
                        state.last_ws_message_time = Some(Instant::now());
                    }
                    Some(WsEvent::Disconnected) => {
                        info!("Bridge disconnected");
                        state.set_connection_status(ConnectionStatus::Disconnected);
                        state.last_ws_message_time = None;
                    }
                    Some(WsEvent::Message(json_str)) => {
                        // A frame after a stale timeout means the bridge is
                        // still there. Only applies once a bridge connected.
                        if state.connection_status == ConnectionStatus::Disconnected
                            && state.last_ws_message_time.is_some()
                        {
                            info!("Bridge connection restored");
                            state.set_connection_status(ConnectionStatus::Connected);
                        }
                        if state.last_ws_message_time.is_some() {
                            state.last_ws_message_time = Some(Instant::now());
                        }
                        handle_ws_message(&mut state, &json_str).await;
                    }
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if state.connection_status == ConnectionStatus::Connected {
                    if let Some(last_time) = state.last_ws_message_time {
                        let elapsed = last_time.elapsed();
                        if elapsed > state.heartbeat_timeout {
                            warn!(
                                "No bridge frame received for {:?}, marking connection as stale",
                                elapsed
                            );
                            state.set_connection_status(ConnectionStatus::Disconnected);
                        }
                    }
                }
            }
        }
    }

    info!("Coordination loop exiting");
    Ok(())
}

/// Parse one bridge frame and hand it to the coordinator.
async fn handle_ws_message(state: &mut AppState, json_str: &str) {
    let msg: ExtensionMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse bridge frame: {e}");
            return;
        }
    };

    let replies = match msg {
        ExtensionMessage::TabsEnumerated { tabs } => {
            info!("Bridge enumerated {} tabs", tabs.len());
            state.coordinator.initialize(&tabs).await
        }
        ExtensionMessage::TabUpdated { tab_id, url } => {
            debug!("Tab {tab_id} navigated to {url}");
            state.coordinator.tab_navigated(tab_id, &url)
        }
        ExtensionMessage::TabRemoved { tab_id } => state.coordinator.tab_closed(tab_id),
        ExtensionMessage::StatusReport { tab_id, report } => {
            state.coordinator.status_report(tab_id, &report).await
        }
        ExtensionMessage::Ping { tab_id } => {
            trace!("Ping from {tab_id:?}");
            Vec::new()
        }
        ExtensionMessage::Operator { command } => {
            debug!("Operator command: {command:?}");
            state.coordinator.operator_command(command).await
        }
    };

    deliver(&state.outbox, &replies);
}

fn deliver(outbox: &Outbox, replies: &[CoreMessage]) {
    for reply in replies {
        outbox.notify(reply);
    }
}
