// Outbound side of the extension bridge.
//
// `Outbox` queues serialized `CoreMessage`s for the WebSocket server task.
// `BridgeAdapter` is the production `TabAdapter`: it turns a tab action into
// an `ACTION` frame that the extension routes to the tab's content script.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use multiclerk_core::dispatch::{AdapterError, TabAdapter};
use multiclerk_core::protocol::{CoreMessage, TabAction, TabId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No bridge is connected. Expected whenever the extension is reloading.
    #[error("no bridge connected")]
    ReceiverAbsent,
    #[error("outbound queue full")]
    ChannelFull,
    #[error("outbound channel closed")]
    ChannelClosed,
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Cloneable handle to the outbound frame queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue one message for the connected bridge.
    pub fn push(&self, message: &CoreMessage) -> Result<(), DeliveryError> {
        if !self.is_connected() {
            return Err(DeliveryError::ReceiverAbsent);
        }
        let frame =
            serde_json::to_string(message).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::ChannelFull,
            TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        })
    }

    /// Push a display notification. An absent receiver is normal and only
    /// logged at debug level.
    pub fn notify(&self, message: &CoreMessage) {
        match self.push(message) {
            Ok(()) => {}
            Err(DeliveryError::ReceiverAbsent) => {
                debug!("Display update dropped: no bridge connected");
            }
            Err(e) => warn!("Display update not delivered: {e}"),
        }
    }
}

/// Sends tab actions through the bridge.
#[derive(Debug, Clone)]
pub struct BridgeAdapter {
    outbox: Outbox,
}

impl BridgeAdapter {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl TabAdapter for BridgeAdapter {
    async fn execute(&self, tab_id: TabId, action: &TabAction) -> Result<(), AdapterError> {
        let message = CoreMessage::Action {
            tab_id,
            action: action.clone(),
        };
        self.outbox.push(&message).map_err(|e| match e {
            DeliveryError::ChannelClosed => AdapterError::ChannelClosed,
            DeliveryError::ReceiverAbsent
            | DeliveryError::ChannelFull
            | DeliveryError::Encode(_) => AdapterError::Unreachable(tab_id),
        })
    }
}
