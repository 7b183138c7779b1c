//! Notification bus — best-effort fan-out to connected kiosk displays.
//!
//! Every display holds one WebSocket at `GET /ws`. Lifecycle events fan out
//! over a `tokio::sync::broadcast` channel: emission order is preserved per
//! connection, lagging receivers skip, disconnected clients miss events.
//! There is no queuing, no acknowledgment, and no replay.
//!
//! Wire protocol — JSON text frames:
//! `{"event": "<name>", "origin": "server"|"client", "data": {...}}`
//!
//! Clients may forward `recording-completed` and the bus re-broadcasts it to
//! everyone (originator included) with origin rewritten to `client`. An
//! inbound frame already claiming origin `server` is a reflection of our own
//! broadcast and is dropped, never re-emitted.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const KIOSK_REGISTER: &str = "kiosk-register";
pub const START_RECORDING: &str = "start-recording";
pub const RECORDING_COMPLETED: &str = "recording-completed";

// ============================================================================
// Wire envelope
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    Server,
    /// Frames arriving without an origin field are client frames.
    #[default]
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub origin: EventOrigin,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn start_recording(session_id: Uuid) -> Self {
        Self {
            event: START_RECORDING.to_string(),
            origin: EventOrigin::Server,
            data: json!({ "sessionId": session_id }),
        }
    }

    pub fn recording_completed(session_id: Uuid, qr_code: &str, download_url: &str) -> Self {
        Self {
            event: RECORDING_COMPLETED.to_string(),
            origin: EventOrigin::Server,
            data: json!({
                "sessionId": session_id,
                "qrCode": qr_code,
                "downloadUrl": download_url,
            }),
        }
    }
}

// ============================================================================
// Inbound frame classification
// ============================================================================

/// What a client frame asks of the bus.
#[derive(Debug)]
pub enum Inbound {
    /// `kiosk-register` — bind a logical kiosk identity to this connection.
    Register { kiosk_id: String },
    /// `recording-completed` forwarded by a display — fan out verbatim.
    Rebroadcast(Envelope),
    /// Unknown event, or a reflected server frame (echo guard).
    Ignored,
}

pub fn classify_inbound(mut envelope: Envelope) -> Inbound {
    match envelope.event.as_str() {
        KIOSK_REGISTER => {
            let kiosk_id = envelope
                .data
                .get("kioskId")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            Inbound::Register { kiosk_id }
        }
        RECORDING_COMPLETED => {
            if envelope.origin == EventOrigin::Server {
                // reflection of our own broadcast
                Inbound::Ignored
            } else {
                envelope.origin = EventOrigin::Client;
                Inbound::Rebroadcast(envelope)
            }
        }
        _ => Inbound::Ignored,
    }
}

// ============================================================================
// Bus handle
// ============================================================================

/// Cheap-to-clone fan-out handle shared by the HTTP handlers and every
/// WebSocket connection task.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Envelope>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Fan an event out to every connected client, returning how many
    /// receivers it reached. Zero receivers is not an error — kiosk displays
    /// come and go.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        match self.tx.send(envelope) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// Per-connection socket loop
// ============================================================================

/// Drive one display connection until it closes: bus events out, client
/// frames in. The kiosk identity lives only in this task's local state.
pub async fn handle_socket(socket: WebSocket, bus: NotificationBus) {
    let mut rx = bus.subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut kiosk_id: Option<String> = None;

    tracing::info!("Display client connected ({} online)", bus.receiver_count());

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(envelope) => {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!("Failed to serialize bus event: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Display client lagged, {} events skipped (kiosk: {:?})",
                        skipped,
                        kiosk_id
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => match classify_inbound(envelope) {
                            Inbound::Register { kiosk_id: id } => {
                                tracing::info!("Kiosk registered: {}", id);
                                kiosk_id = Some(id);
                            }
                            Inbound::Rebroadcast(envelope) => {
                                tracing::debug!(
                                    "Re-broadcasting {} from kiosk {:?}",
                                    envelope.event,
                                    kiosk_id
                                );
                                bus.broadcast(envelope);
                            }
                            Inbound::Ignored => {}
                        },
                        Err(e) => tracing::debug!("Dropping malformed frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary — no protocol effect
                Some(Err(e)) => {
                    tracing::debug!("WebSocket error (kiosk: {:?}): {}", kiosk_id, e);
                    break;
                }
            },
        }
    }

    tracing::info!("Display client disconnected (kiosk: {:?})", kiosk_id);
}
