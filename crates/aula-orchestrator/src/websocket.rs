//! WebSocket event types and broadcasting for progressive resource updates.
//!
//! Every state change the orchestrator emits is forwarded to all connected
//! clients, so a UI can render each resource as soon as it settles instead
//! of waiting for the whole batch.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current board
//! - `resource` - One resource changed state (`loading`, `ready`, `error`)
//! - `batch_complete` - Every resource of the batch has settled
//! - `error` - The batch could not be processed at all
//!
//! # Example
//!
//! ```no_run
//! use aula_orchestrator::websocket::{EventBroadcaster, ResourceEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(ResourceEvent::batch_complete(3, 1));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::resource::{LevelContext, ResolvedResource};
use crate::sink::{ResourceBoard, ResourceUpdate, UpdateSink};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Context of the batch being tracked, if any.
    pub context: Option<LevelContext>,
    /// Every tracked resource in batch order.
    pub resources: Vec<ResolvedResource>,
}

/// Payload for the `batch_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompletePayload {
    /// Resources that ended `ready`.
    pub ready: usize,
    /// Resources that ended `error`.
    pub failed: usize,
    /// When the last resource settled.
    pub completed_at: DateTime<Utc>,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events pushed to WebSocket clients.
///
/// Serialized as JSON objects with `event` and `payload` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// A resource changed state.
    Resource(ResourceUpdate),
    /// Every resource of the batch has settled.
    BatchComplete(BatchCompletePayload),
    /// The batch was rejected or could not run.
    Error(ErrorPayload),
}

impl ResourceEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(context: Option<LevelContext>, resources: Vec<ResolvedResource>) -> Self {
        Self::Connected(ConnectedPayload { context, resources })
    }

    /// Creates a `BatchComplete` event stamped with the current time.
    #[must_use]
    pub fn batch_complete(ready: usize, failed: usize) -> Self {
        Self::BatchComplete(BatchCompletePayload {
            ready,
            failed,
            completed_at: Utc::now(),
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Resource(_) => "resource",
            Self::BatchComplete(_) => "batch_complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts resource events to all connected WebSocket clients.
///
/// Uses a tokio broadcast channel. Events are not persisted for
/// disconnected clients; late joiners get the board in `connected`.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ResourceEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives `Lagged` and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will receive it.
    pub fn send(&self, event: ResourceEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl UpdateSink for EventBroadcaster {
    fn emit(&self, update: ResourceUpdate) {
        self.send(ResourceEvent::Resource(update));
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Shared state for WebSocket handlers.
#[derive(Debug, Clone)]
pub struct WsState {
    /// Source of live events.
    pub broadcaster: EventBroadcaster,
    /// Current batch, sent to clients on connect.
    pub board: Arc<ResourceBoard>,
}

impl WsState {
    /// Creates a `WsState` with a default-capacity broadcaster.
    #[must_use]
    pub fn new(board: Arc<ResourceBoard>) -> Self {
        Self {
            broadcaster: EventBroadcaster::default(),
            board,
        }
    }

    /// Creates a `WsState` sharing an existing broadcaster.
    #[must_use]
    pub const fn with_broadcaster(board: Arc<ResourceBoard>, broadcaster: EventBroadcaster) -> Self {
        Self { broadcaster, board }
    }
}

/// Upgrades `/ws` requests and spawns the per-connection loop.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Handles a single WebSocket connection.
///
/// - Sends `connected` with the current board immediately
/// - Forwards every broadcast event
/// - Pings every 30 seconds and closes after 3 missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the board so nothing emitted in between is lost
    let mut event_receiver = state.broadcaster.subscribe();

    let connected = ResourceEvent::connected(state.board.context(), state.board.snapshot());
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent current board");

    let mut heartbeat_interval = interval(HEARTBEAT);
    // The first tick completes immediately
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring data message from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize {} event: {}", event.event_name(), e);
                                continue;
                            }
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
