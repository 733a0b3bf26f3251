//! Resource types for the Aula resolution pipeline.
//!
//! This module defines the request/resolved-resource data model, the
//! per-resource status state machine, and the resolution batch that groups
//! requests with their shared audience context.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AulaError, Result};

// ============================================================================
// Audience context
// ============================================================================

/// Audience band a lesson targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EducationLevel {
    /// Early childhood (youngest band).
    Inicial,
    /// Primary school.
    #[default]
    Primaria,
    /// Secondary school (oldest band).
    Secundaria,
}

impl EducationLevel {
    /// Parses a string into an `EducationLevel`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "inicial" => Some(Self::Inicial),
            "primaria" => Some(Self::Primaria),
            "secundaria" => Some(Self::Secundaria),
            _ => None,
        }
    }

    /// Returns the canonical display name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inicial => "Inicial",
            Self::Primaria => "Primaria",
            Self::Secundaria => "Secundaria",
        }
    }
}

impl std::fmt::Display for EducationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EducationLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid education level '{s}': expected one of 'Inicial', 'Primaria', 'Secundaria'"
            ))
        })
    }
}

impl Serialize for EducationLevel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Shared context for every request in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelContext {
    /// Audience band.
    pub level: EducationLevel,
    /// Grade within the band (free text, e.g. "3er grado").
    #[serde(default)]
    pub grade: String,
    /// Subject area (e.g. "Ciencias Naturales").
    #[serde(default)]
    pub subject_area: String,
}

impl LevelContext {
    /// Creates a context for the given level.
    #[must_use]
    pub fn new(level: EducationLevel, grade: impl Into<String>, subject_area: impl Into<String>) -> Self {
        Self {
            level,
            grade: grade.into(),
            subject_area: subject_area.into(),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Phase of the lesson a resource belongs to. UI grouping only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonMoment {
    /// Lesson opening.
    Opening,
    /// Main development.
    #[default]
    Development,
    /// Lesson closing.
    Closing,
    /// Take-home work.
    Homework,
}

impl LessonMoment {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Development => "development",
            Self::Closing => "closing",
            Self::Homework => "homework",
        }
    }
}

impl std::fmt::Display for LessonMoment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagram subtype for generated diagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DiagramType {
    /// Process or decision flow.
    #[default]
    Flowchart,
    /// Concept map around a central idea.
    Mindmap,
    /// Events along a time axis.
    Timeline,
    /// Interaction between actors over time.
    Sequence,
    /// Closed loop of stages.
    Cycle,
}

impl DiagramType {
    /// Parses a string into a `DiagramType`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "flowchart" => Some(Self::Flowchart),
            "mindmap" => Some(Self::Mindmap),
            "timeline" => Some(Self::Timeline),
            "sequence" => Some(Self::Sequence),
            "cycle" => Some(Self::Cycle),
            _ => None,
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Sequence => "sequence",
            Self::Cycle => "cycle",
        }
    }

    /// Returns the Mermaid header that opens a diagram of this type.
    #[must_use]
    pub const fn mermaid_header(&self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart TD",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Sequence => "sequenceDiagram",
            Self::Cycle => "flowchart LR",
        }
    }
}

impl std::fmt::Display for DiagramType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DiagramType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid diagram type '{s}': expected one of 'flowchart', 'mindmap', 'timeline', 'sequence', 'cycle'"
            ))
        })
    }
}

impl Serialize for DiagramType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// What a request asks for. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// An AI-generated illustration.
    GeneratedImage {
        /// Generation instruction (may be blank; the title is used instead).
        #[serde(default)]
        prompt: String,
    },
    /// A generated diagram.
    GeneratedDiagram {
        /// Natural-language description of what to diagram.
        description: String,
        /// Diagram subtype.
        #[serde(default, rename = "diagramType")]
        diagram_type: DiagramType,
    },
    /// An externally searched video.
    SearchedVideo {
        /// Search query.
        query: String,
    },
    /// An externally searched photograph.
    SearchedImage {
        /// Search query.
        query: String,
    },
}

impl ResourceKind {
    /// Returns the wire tag of this kind.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::GeneratedImage { .. } => "generated_image",
            Self::GeneratedDiagram { .. } => "generated_diagram",
            Self::SearchedVideo { .. } => "searched_video",
            Self::SearchedImage { .. } => "searched_image",
        }
    }

    /// Returns `true` for the rate-limited image generation kind.
    #[must_use]
    pub const fn is_generated_image(&self) -> bool {
        matches!(self, Self::GeneratedImage { .. })
    }
}

/// Data carried over from an earlier resolution stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSource {
    /// Already resolved URL; short-circuits resolution when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    /// Thumbnail for the resolved URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Credit line for the resolved URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

/// Immutable description of a desired artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    /// Stable id, `<type>-<lessonMoment>-<slug>`; unique within a batch.
    #[serde(default)]
    pub id: String,
    /// Human-facing label; unique within a batch.
    pub title: String,
    /// Lesson phase.
    #[serde(default)]
    pub lesson_moment: LessonMoment,
    /// Kind and kind-specific fields.
    #[serde(flatten)]
    pub kind: ResourceKind,
    /// Previously resolved data, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourceSource>,
}

impl ResourceRequest {
    /// Creates a request with no prior source data.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        lesson_moment: LessonMoment,
        kind: ResourceKind,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            lesson_moment,
            kind,
            source: None,
        }
    }

    /// Attaches previously resolved source data.
    #[must_use]
    pub fn with_source(mut self, source: ResourceSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the previously resolved URL if present and non-blank.
    #[must_use]
    pub fn resolved_url(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.resolved_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    /// Composes the canonical id for this request from its kind, moment, and title.
    #[must_use]
    pub fn canonical_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.kind.type_name(),
            self.lesson_moment,
            slug::slugify(&self.title)
        )
    }
}

/// Checks the batch invariants: non-blank ids, unique ids, unique titles.
///
/// # Errors
///
/// Returns the first violation found, in request order.
pub fn validate_requests(requests: &[ResourceRequest]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut titles = HashSet::new();
    for request in requests {
        if request.id.trim().is_empty() {
            return Err(AulaError::missing_id(&request.title));
        }
        if !ids.insert(request.id.as_str()) {
            return Err(AulaError::duplicate_id(&request.id));
        }
        if !titles.insert(request.title.trim()) {
            return Err(AulaError::duplicate_title(&request.title));
        }
    }
    Ok(())
}

// ============================================================================
// Status state machine
// ============================================================================

/// Resolution status of a single resource.
///
/// Transitions:
/// - `Pending` -> `Loading` -> `Ready` | `Error`
/// - `Pending` -> `Ready` | `Error` (resolved without a visible loading phase)
/// - `Ready` | `Error` -> `Loading` (a new attempt, e.g. a manual retry)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// In flight.
    Loading,
    /// Artifact available.
    #[serde(alias = "resolved")]
    Ready,
    /// Resolution failed; `error` carries the reason.
    Error,
}

impl ResourceStatus {
    /// Returns `true` if this status ends a resolution attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use aula_orchestrator::ResourceStatus;
    ///
    /// assert!(ResourceStatus::Ready.is_terminal());
    /// assert!(ResourceStatus::Error.is_terminal());
    /// assert!(!ResourceStatus::Loading.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    /// Returns `true` if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Loading | Self::Ready | Self::Error)
                | (Self::Loading, Self::Ready | Self::Error)
                | (Self::Ready | Self::Error, Self::Loading)
        )
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Resolved resources
// ============================================================================

/// Payload of a ready resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// Generated image bytes, base64 encoded.
    InlineImage {
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64 data.
        data: String,
    },
    /// Diagram source plus a plain-text fallback.
    Diagram {
        /// Mermaid source.
        source: String,
        /// Plain-text description shown when the diagram cannot render.
        fallback: String,
    },
    /// A direct URL.
    Link {
        /// Target URL.
        url: String,
    },
}

impl Artifact {
    /// Returns the URL of a link artifact.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Link { url } => Some(url),
            Self::InlineImage { .. } | Self::Diagram { .. } => None,
        }
    }
}

impl From<aula_backend::InlineImage> for Artifact {
    fn from(image: aula_backend::InlineImage) -> Self {
        Self::InlineImage {
            mime_type: image.mime_type,
            data: image.data,
        }
    }
}

/// A request annotated with its resolution status and outcome.
///
/// Every state change returns a new value; emitted snapshots never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedResource {
    /// The originating request.
    #[serde(flatten)]
    pub request: ResourceRequest,
    /// Current status.
    pub status: ResourceStatus,
    /// Payload once ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Preview image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Credit line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// Failure reason when status is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolvedResource {
    /// Wraps a request in `pending` status.
    #[must_use]
    pub const fn pending(request: ResourceRequest) -> Self {
        Self {
            request,
            status: ResourceStatus::Pending,
            artifact: None,
            thumbnail_url: None,
            attribution: None,
            error: None,
        }
    }

    /// Returns the resource id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.request.id
    }

    fn transition(&self, next: ResourceStatus) -> Result<Self> {
        if !self.status.can_transition_to(next) {
            return Err(AulaError::invalid_transition(self.status, next));
        }
        Ok(Self {
            status: next,
            ..self.clone()
        })
    }

    /// Returns a `loading` copy, clearing any previous outcome.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if already loading.
    pub fn begin_loading(&self) -> Result<Self> {
        let mut next = self.transition(ResourceStatus::Loading)?;
        next.artifact = None;
        next.error = None;
        Ok(next)
    }

    /// Returns a `ready` copy carrying `artifact`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the current attempt already ended.
    pub fn resolve(&self, artifact: Artifact) -> Result<Self> {
        let mut next = self.transition(ResourceStatus::Ready)?;
        next.artifact = Some(artifact);
        next.error = None;
        Ok(next)
    }

    /// Returns an `error` copy carrying `message`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the current attempt already ended.
    pub fn fail(&self, message: impl Into<String>) -> Result<Self> {
        let mut next = self.transition(ResourceStatus::Error)?;
        next.artifact = None;
        next.error = Some(message.into());
        Ok(next)
    }

    /// Sets the thumbnail URL.
    #[must_use]
    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    /// Sets the attribution.
    #[must_use]
    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    /// Returns the artifact URL for link resources.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.artifact.as_ref().and_then(Artifact::url)
    }
}

// ============================================================================
// ResolutionBatch
// ============================================================================

/// One invocation's worth of requests plus their shared context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionBatch {
    /// Audience context shared by every request.
    pub context: LevelContext,
    /// Requests in display order.
    #[serde(default)]
    pub resources: Vec<ResourceRequest>,
}

impl ResolutionBatch {
    /// Creates a batch.
    #[must_use]
    pub const fn new(context: LevelContext, resources: Vec<ResourceRequest>) -> Self {
        Self { context, resources }
    }

    /// Loads a batch from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `BatchNotFound` if the file does not exist and `BatchParseError`
    /// if it is not a valid batch document.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AulaError::batch_not_found(path));
            }
            Err(e) => return Err(AulaError::Io(e)),
        };
        serde_json::from_str(&contents).map_err(|e| AulaError::batch_parse(path, e.to_string()))
    }

    /// Checks the batch invariants.
    ///
    /// # Errors
    ///
    /// See [`validate_requests`].
    pub fn validate(&self) -> Result<()> {
        validate_requests(&self.resources)
    }

    /// Fills blank ids with `<type>-<lessonMoment>-<slug>`, suffixing `-2`, `-3`
    /// on collision. Returns how many ids were assigned.
    pub fn assign_missing_ids(&mut self) -> usize {
        let mut taken: HashSet<String> = self
            .resources
            .iter()
            .filter(|r| !r.id.trim().is_empty())
            .map(|r| r.id.clone())
            .collect();

        let mut assigned = 0;
        for request in &mut self.resources {
            if !request.id.trim().is_empty() {
                continue;
            }
            let base = request.canonical_id();
            let mut candidate = base.clone();
            let mut n = 2;
            while taken.contains(&candidate) {
                candidate = format!("{base}-{n}");
                n += 1;
            }
            taken.insert(candidate.clone());
            request.id = candidate;
            assigned += 1;
        }
        assigned
    }
}

// ============================================================================
// Tests
// ============================================================================
