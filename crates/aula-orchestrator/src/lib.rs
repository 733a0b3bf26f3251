//! Aula Resource Orchestrator
//!
//! Resolves the multimedia resources of a lesson: generated illustrations,
//! generated diagrams, searched videos and searched photographs.
//!
//! Two entry points share the same handlers:
//!
//! - [`Resolver::resolve_all`] returns every resource at once, throttling
//!   image generation into sequential windows.
//! - [`Orchestrator::process_all`] streams each state change into an
//!   [`UpdateSink`] as soon as it happens.
//!
//! The HTTP API and WebSocket stream in [`api`] and [`websocket`] expose the
//! progressive flow to a browser.

pub mod api;
pub mod config;
pub mod error;
pub mod links;
pub mod orchestrator;
pub mod placeholder;
pub mod prompt;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod sink;
pub mod websocket;

pub use api::{create_router, AppState, BatchAccepted, BoardResponse, ErrorResponse};
pub use config::{
    BackendConfig, Config, ResolverConfig, RetryConfig, ServerConfig, CONFIG_FILE_NAME,
};
pub use error::{AulaError, Result};
pub use links::{ExternalLink, LinkKind, LinkResolver};
pub use orchestrator::{BatchOutcome, Orchestrator};
pub use resolver::{GenerationWindow, Resolver};
pub use resource::{
    validate_requests, Artifact, DiagramType, EducationLevel, LessonMoment, LevelContext,
    ResolutionBatch, ResolvedResource, ResourceKind, ResourceRequest, ResourceSource,
    ResourceStatus,
};
pub use retry::RetryPolicy;
pub use sink::{BatchSink, ResourceBoard, ResourceUpdate, RetryRefused, UpdateKind, UpdateSink};
pub use websocket::{EventBroadcaster, ResourceEvent};
