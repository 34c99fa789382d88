// WebSocket server for the browser extension bridge.
//
// One bridge connection at a time. Inbound text frames become `WsEvent`s
// for the coordination loop; outbound frames queued by the core are written
// to whichever bridge is currently connected.

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Events emitted by the WebSocket server to the coordination loop.
#[derive(Debug, PartialEq)]
pub enum WsEvent {
    /// A bridge has connected.
    Connected { addr: String },
    /// The current bridge has disconnected.
    Disconnected,
    /// A text frame from the bridge (raw JSON).
    Message(String),
}

/// Bind `127.0.0.1:{port}` and serve bridges until the task is cancelled.
pub async fn run(
    port: u16,
    tx: mpsc::Sender<WsEvent>,
    outbound: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    serve(listener, tx, outbound).await
}

/// Accept bridges on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    tx: mpsc::Sender<WsEvent>,
    mut outbound: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    info!("WebSocket server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {addr_str}: {e}");
                continue;
            }
        };

        // Drop what is queued at accept time. The coordination loop may
        // still push a few frames before it sees the previous
        // `Disconnected`; those reach the new bridge.
        let stale = drain_stale(&mut outbound);
        if stale > 0 {
            debug!("Dropped {stale} outbound frames queued before accepting {addr_str}");
        }

        if tx
            .send(WsEvent::Connected {
                addr: addr_str.clone(),
            })
            .await
            .is_err()
        {
            break;
        }

        if serve_connection(ws_stream, &tx, &mut outbound, &addr_str)
            .await
            .is_err()
        {
            break;
        }

        if tx.send(WsEvent::Disconnected).await.is_err() {
            break;
        }
    }

    Ok(())
}

fn drain_stale(outbound: &mut mpsc::Receiver<String>) -> usize {
    let mut dropped = 0;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

/// Pump one connection: forward inbound frames to `tx` and write outbound
/// frames to the socket. Returns `Err(())` once the event receiver is gone.
async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    tx: &mpsc::Sender<WsEvent>,
    outbound: &mut mpsc::Receiver<String>,
    addr: &str,
) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, read) = ws_stream.split();
    let reader = process_message_stream(read, tx, addr);
    tokio::pin!(reader);

    loop {
        tokio::select! {
            result = &mut reader => return result,
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!("Failed to write to {addr}: {e}");
                        return Ok(());
                    }
                }
                // Nobody can queue frames any more; keep reading.
                None => return (&mut reader).await,
            },
        }
    }
}

/// Forward text payloads from any [`Stream`] of frames through `tx`.
/// Stops at a close frame or a transport error.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(WsEvent::Message(text.to_string())).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Bridge {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
