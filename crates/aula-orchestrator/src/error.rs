//! Error types for the Aula resource orchestrator.
//!
//! This module defines the error hierarchy for configuration loading, batch
//! parsing and validation, resource state transitions, and backend calls.
//!
//! Only setup errors (config, batch validation) ever reach a batch caller.
//! Per-resource failures are converted to `error` status at the resource
//! boundary and travel through the update sink instead.

use std::path::PathBuf;

use aula_backend::{BackendError, BackendErrorKind};

/// A specialized `Result` type for Aula orchestrator operations.
pub type Result<T> = std::result::Result<T, AulaError>;

/// Errors that can occur while resolving lesson resources.
#[derive(Debug, thiserror::Error)]
pub enum AulaError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your aula.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Batch Errors
    // ========================================================================
    /// Batch file was not found at the specified path.
    #[error("Resolution batch not found: '{path}'\n\nSuggestion: Check the path passed to 'aula resolve'")]
    BatchNotFound {
        /// Path where the batch was expected.
        path: PathBuf,
    },

    /// Batch file is not a valid resolution batch document.
    #[error("Invalid resolution batch '{path}': {message}\n\nSuggestion: A batch needs a 'context' object and a 'resources' array")]
    BatchParseError {
        /// Path to the batch file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Two resources in one batch share an id.
    #[error("Duplicate resource id '{id}' in batch\n\nSuggestion: Resource ids must be unique; use <type>-<lessonMoment>-<slug>")]
    DuplicateResourceId {
        /// The repeated id.
        id: String,
    },

    /// Two resources in one batch share a title.
    #[error("Duplicate resource title '{title}' in batch\n\nSuggestion: Titles are used to match prose references; make each one distinct")]
    DuplicateResourceTitle {
        /// The repeated title.
        title: String,
    },

    /// A resource has a blank id.
    #[error("Resource '{title}' has no id\n\nSuggestion: Assign ids before resolving (see ResolutionBatch::assign_missing_ids)")]
    MissingResourceId {
        /// Title of the resource without an id.
        title: String,
    },

    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// The backend answered but an expected field was absent or unusable.
    #[error("Malformed backend response: field '{field}' {message}")]
    MalformedResponse {
        /// Name of the offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The generative backend failed.
    #[error("{0}\n\nSuggestion: {suggestion}", suggestion = .0.kind().suggestion())]
    Backend(#[from] BackendError),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

impl AulaError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `BatchNotFound` error.
    #[must_use]
    pub fn batch_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BatchNotFound { path: path.into() }
    }

    /// Creates a new `BatchParseError`.
    #[must_use]
    pub fn batch_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::BatchParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `DuplicateResourceId` error.
    #[must_use]
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateResourceId { id: id.into() }
    }

    /// Creates a new `DuplicateResourceTitle` error.
    #[must_use]
    pub fn duplicate_title(title: impl Into<String>) -> Self {
        Self::DuplicateResourceTitle {
            title: title.into(),
        }
    }

    /// Creates a new `MissingResourceId` error.
    #[must_use]
    pub fn missing_id(title: impl Into<String>) -> Self {
        Self::MissingResourceId {
            title: title.into(),
        }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend(e) if matches!(
                e.kind(),
                BackendErrorKind::RateLimit | BackendErrorKind::Server | BackendErrorKind::Network
            )
        )
    }

    /// Returns `true` if this error rejects a whole batch before any work starts.
    #[must_use]
    pub const fn is_batch_invalid(&self) -> bool {
        matches!(
            self,
            Self::BatchParseError { .. }
                | Self::DuplicateResourceId { .. }
                | Self::DuplicateResourceTitle { .. }
                | Self::MissingResourceId { .. }
        )
    }

    /// Returns a message suitable for a resource's `error` field.
    ///
    /// Strips the trailing suggestion paragraph, which is aimed at operators
    /// rather than the person looking at the lesson.
    #[must_use]
    pub fn resource_message(&self) -> String {
        let full = self.to_string();
        full.split("\n\nSuggestion:")
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}
