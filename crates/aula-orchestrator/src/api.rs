//! HTTP API for submitting batches and observing their resources.
//!
//! # Endpoints
//!
//! - `POST /api/batches` - Validate a batch, start resolving it, return 202
//! - `GET /api/resources` - Current board (context plus resources in order)
//! - `GET /api/resources/:id` - One resource
//! - `POST /api/resources/:id/retry` - Re-resolve a single resource
//! - `GET /ws` - WebSocket event stream
//!
//! Resolution runs in a background task; progress is visible through the
//! board endpoints and the WebSocket stream.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aula_backend::GeminiClient;
//! use aula_orchestrator::{create_router, AppState, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let backend = Arc::new(GeminiClient::from_env(&config.backend.api_key_env)?);
//! let router = create_router(AppState::new(config, backend));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use aula_backend::GenerativeBackend;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::resource::{LevelContext, ResolutionBatch, ResolvedResource};
use crate::sink::{BatchSink, ResourceBoard, ResourceUpdate, RetryRefused, UpdateSink};
use crate::websocket::{ws_handler, EventBroadcaster, ResourceEvent, WsState};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for `POST /api/batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAccepted {
    /// Number of resources accepted.
    pub accepted: usize,
    /// Ids of the accepted resources, including any that were assigned.
    pub ids: Vec<String>,
}

/// Response body for `GET /api/resources`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardResponse {
    /// Context of the tracked batch, if one was submitted.
    pub context: Option<LevelContext>,
    /// Tracked resources in batch order.
    pub resources: Vec<ResolvedResource>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Resources of the most recently submitted batch.
    pub board: Arc<ResourceBoard>,
    /// Fan-out to WebSocket clients.
    pub broadcaster: EventBroadcaster,
    /// Resolution driver.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Creates the state for `backend`, sized from `config`.
    #[must_use]
    pub fn new(config: Config, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            orchestrator: Orchestrator::from_config(backend, &config),
            broadcaster: EventBroadcaster::new(config.server.event_capacity),
            board: Arc::new(ResourceBoard::new()),
            config,
        }
    }

    /// Starts resolving `batch` in a background task bound to `generation`.
    ///
    /// Once a newer batch is tracked, this task's updates and its
    /// `batch_complete` are dropped.
    fn spawn_batch(&self, generation: u64, batch: ResolutionBatch) {
        let orchestrator = self.orchestrator.clone();
        let sink = BatchSink::new(self.board.clone(), generation, self.broadcaster.clone());
        tokio::spawn(async move {
            let result = orchestrator
                .process_all(&batch.resources, &batch.context, &sink)
                .await;
            if !sink.is_current() {
                debug!(generation, "Batch superseded before completing");
                return;
            }
            match result {
                Ok(outcome) => {
                    sink.forward()
                        .send(ResourceEvent::batch_complete(outcome.ready, outcome.failed));
                }
                Err(e) => {
                    warn!(error = %e, "Batch could not be processed");
                    sink.forward().send(ResourceEvent::error(e.resource_message()));
                }
            }
        });
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The submitted batch breaks an invariant.
    InvalidBatch(String),
    /// No tracked resource has this id.
    NotFound(String),
    /// The resource is already being resolved.
    Busy(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidBatch(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Busy(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router.
///
/// API routes live under `/api`, the event stream at `/ws`. CORS is open
/// for local development and every request is traced.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_state = Arc::new(WsState::with_broadcaster(
        state.board.clone(),
        state.broadcaster.clone(),
    ));

    let api_routes = Router::new()
        .route("/batches", post(handle_submit_batch))
        .route("/resources", get(handle_list_resources))
        .route("/resources/:id", get(handle_get_resource))
        .route("/resources/:id/retry", post(handle_retry_resource))
        .with_state(Arc::new(state));

    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(ws_state);

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/batches`.
///
/// Blank ids are assigned before validation. A valid batch replaces the
/// board and starts resolving in the background.
async fn handle_submit_batch(
    State(state): State<Arc<AppState>>,
    Json(mut batch): Json<ResolutionBatch>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    let assigned = batch.assign_missing_ids();
    if let Err(e) = batch.validate() {
        warn!(error = %e, "Rejected batch");
        return Err(ApiError::InvalidBatch(e.resource_message()));
    }

    let ids: Vec<String> = batch.resources.iter().map(|r| r.id.clone()).collect();
    info!(
        resources = ids.len(),
        assigned,
        level = %batch.context.level,
        "Batch accepted"
    );

    let generation = state.board.track(&batch);
    state.spawn_batch(generation, batch);

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            accepted: ids.len(),
            ids,
        }),
    ))
}

/// Handler for `GET /api/resources`.
async fn handle_list_resources(State(state): State<Arc<AppState>>) -> Json<BoardResponse> {
    Json(BoardResponse {
        context: state.board.context(),
        resources: state.board.snapshot(),
    })
}

/// Handler for `GET /api/resources/:id`.
async fn handle_get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResolvedResource>, ApiError> {
    state
        .board
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Resource '{id}' is not tracked")))
}

/// Handler for `POST /api/resources/:id/retry`.
///
/// Re-resolves one settled resource. Its siblings are untouched. The board
/// marks it `loading` before the response is sent, so a second retry
/// arriving meanwhile gets 409.
async fn handle_retry_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResolvedResource>), ApiError> {
    let (generation, loading) = state.board.begin_retry(&id).map_err(|e| match e {
        RetryRefused::Untracked => ApiError::NotFound(format!("Resource '{id}' is not tracked")),
        RetryRefused::Busy => ApiError::Busy(format!("Resource '{id}' is already loading")),
    })?;

    let context = state.board.context().unwrap_or_default();
    info!(resource_id = %id, generation, "Retrying resource");

    let sink = BatchSink::new(state.board.clone(), generation, state.broadcaster.clone());
    sink.forward().emit(ResourceUpdate::new(loading.clone()));

    let orchestrator = state.orchestrator.clone();
    let claimed = loading.clone();
    tokio::spawn(async move {
        orchestrator.settle(claimed, &context, &sink).await;
    });

    Ok((StatusCode::ACCEPTED, Json(loading)))
}

// ============================================================================
// Tests
// ============================================================================
