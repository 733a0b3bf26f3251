//! Aula Backend
//!
//! Narrow request/response contract to the generative and grounded-search
//! service used by resource resolution.
//!
//! The [`GenerativeBackend`] trait is the only surface the pipeline depends
//! on. [`GeminiClient`] implements it over HTTP; tests substitute
//! `testing::FakeBackend` (behind the `testing` feature).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod gemini;
#[cfg(feature = "testing")]
pub mod testing;

pub use gemini::GeminiClient;

/// A specialized `Result` type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors returned by a generative backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The client could not be configured (missing API key, bad settings).
    #[error("backend configuration error: {0}")]
    Config(String),

    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("backend API error ({kind}, status {status}): {message}")]
    Api {
        /// Classification of the failure.
        kind: BackendErrorKind,
        /// HTTP status code returned by the service.
        status: u16,
        /// Body or message returned by the service.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to parse backend response: {0}")]
    Parse(String),

    /// The response decoded but carried none of the expected content.
    #[error("backend returned no {0}")]
    EmptyResponse(String),
}

impl BackendError {
    /// Creates an `Api` error, classifying the status code.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            kind: BackendErrorKind::from_status(status),
            status,
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Api { kind, .. } => *kind,
            Self::Network(_) => BackendErrorKind::Network,
            Self::Config(_) | Self::Parse(_) | Self::EmptyResponse(_) => BackendErrorKind::Other,
        }
    }
}

/// Categories of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl BackendErrorKind {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key in the environment variable named by backend.apiKeyEnv",
            Self::RateLimit => "Wait and retry, or lower resolver.maxConcurrentGenerations",
            Self::Server => "Retry later; the generation service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the backend model names and the service status page",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Shape of the text a `generate_content` call should return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free-form text.
    #[default]
    Text,
    /// A single JSON document.
    Json,
}

/// A source reference returned alongside a grounded response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Web address of the source.
    pub url: String,
    /// Title of the source page.
    pub title: String,
}

impl Citation {
    /// Creates a new citation.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Text plus citations from a search-augmented generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedResponse {
    /// Raw text of the answer.
    pub text: String,
    /// Citations in the order the service returned them.
    pub citations: Vec<Citation>,
}

impl GroundedResponse {
    /// Creates a response with text and no citations.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    /// Adds a citation.
    #[must_use]
    pub fn with_citation(mut self, citation: Citation) -> Self {
        self.citations.push(citation);
        self
    }
}

/// Generated image content, base64 encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    /// MIME type reported by the service (e.g. `image/png`).
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl InlineImage {
    /// Creates a new inline image.
    #[must_use]
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// The remote generative/search service.
///
/// Implementations must be cheap to share behind an `Arc`; every method may
/// be called concurrently.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Generates text for a prompt, optionally constrained to JSON.
    async fn generate_content(&self, prompt: &str, format: ResponseFormat) -> Result<String>;

    /// Generates text with web-search grounding and returns its citations.
    async fn generate_grounded(&self, prompt: &str) -> Result<GroundedResponse>;

    /// Generates a single image.
    async fn generate_image(&self, prompt: &str) -> Result<InlineImage>;
}
