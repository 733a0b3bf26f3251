//! Scriptable in-memory backend for tests.
//!
//! [`FakeBackend`] answers every call from canned values, records each call,
//! and can be told to fail on specific prompts or for the first N calls of an
//! operation. It also tracks how many image generations were in flight at
//! once so callers can assert on concurrency bounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BackendError, Citation, GenerativeBackend, GroundedResponse, InlineImage, ResponseFormat,
    Result,
};

/// Default JSON answer: a valid diagram payload.
pub const DEFAULT_JSON: &str =
    r#"{"mermaid":"graph TD\n  A[Evaporation] --> B[Condensation]","description":"Water cycle stages"}"#;

/// Default image payload (truncated PNG header, base64).
pub const DEFAULT_IMAGE_DATA: &str = "iVBORw0KGgo=";

/// Backend operations, used to address scripted failures and call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `generate_content`
    Content,
    /// `generate_grounded`
    Grounded,
    /// `generate_image`
    Image,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Which operation was invoked.
    pub op: BackendOp,
    /// Prompt passed to the operation.
    pub prompt: String,
}

struct FailFirst {
    remaining: usize,
    error: BackendError,
}

/// In-memory [`GenerativeBackend`].
pub struct FakeBackend {
    latency: Duration,
    text: String,
    json: String,
    grounded: GroundedResponse,
    grounded_by_prompt: Vec<(String, GroundedResponse)>,
    image: InlineImage,
    failing_prompts: Vec<(String, BackendError)>,
    fail_first: Mutex<HashMap<BackendOp, FailFirst>>,
    calls: Mutex<Vec<RecordedCall>>,
    images_in_flight: AtomicUsize,
    max_images_in_flight: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a backend that succeeds instantly on every call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            text: "ok".to_string(),
            json: DEFAULT_JSON.to_string(),
            grounded: GroundedResponse::text("Found it.").with_citation(Citation::new(
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "Educational video",
            )),
            grounded_by_prompt: Vec::new(),
            image: InlineImage::new("image/png", DEFAULT_IMAGE_DATA),
            failing_prompts: Vec::new(),
            fail_first: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            images_in_flight: AtomicUsize::new(0),
            max_images_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delays every call by `latency` (uses `tokio::time`, so paused clocks apply).
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the answer for text-format `generate_content` calls.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Sets the answer for JSON-format `generate_content` calls.
    #[must_use]
    pub fn with_json(mut self, json: impl Into<String>) -> Self {
        self.json = json.into();
        self
    }

    /// Sets the default grounded answer.
    #[must_use]
    pub fn with_grounded(mut self, response: GroundedResponse) -> Self {
        self.grounded = response;
        self
    }

    /// Answers grounded calls whose prompt contains `needle` with `response`.
    #[must_use]
    pub fn with_grounded_for(mut self, needle: impl Into<String>, response: GroundedResponse) -> Self {
        self.grounded_by_prompt.push((needle.into(), response));
        self
    }

    /// Sets the generated image.
    #[must_use]
    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = image;
        self
    }

    /// Fails every call whose prompt contains `needle`.
    #[must_use]
    pub fn fail_prompts_containing(mut self, needle: impl Into<String>, error: BackendError) -> Self {
        self.failing_prompts.push((needle.into(), error));
        self
    }

    /// Fails the first `times` calls of `op`, then behaves normally.
    #[must_use]
    pub fn fail_first(self, op: BackendOp, times: usize, error: BackendError) -> Self {
        lock(&self.fail_first).insert(
            op,
            FailFirst {
                remaining: times,
                error,
            },
        );
        self
    }

    /// Fails every call of `op`.
    #[must_use]
    pub fn fail_always(self, op: BackendOp, error: BackendError) -> Self {
        self.fail_first(op, usize::MAX, error)
    }

    /// Returns every call made so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Returns how many times `op` was invoked.
    #[must_use]
    pub fn call_count(&self, op: BackendOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    /// Returns the highest number of concurrent `generate_image` calls observed.
    #[must_use]
    pub fn max_concurrent_images(&self) -> usize {
        self.max_images_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: BackendOp, prompt: &str) -> Result<()> {
        lock(&self.calls).push(RecordedCall {
            op,
            prompt: prompt.to_string(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some((_, error)) = self
            .failing_prompts
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return Err(error.clone());
        }

        let mut scripted = lock(&self.fail_first);
        if let Some(entry) = scripted.get_mut(&op) {
            if entry.remaining > 0 {
                entry.remaining = entry.remaining.saturating_sub(1);
                return Err(entry.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    async fn generate_content(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        self.enter(BackendOp::Content, prompt).await?;
        Ok(match format {
            ResponseFormat::Text => self.text.clone(),
            ResponseFormat::Json => self.json.clone(),
        })
    }

    async fn generate_grounded(&self, prompt: &str) -> Result<GroundedResponse> {
        self.enter(BackendOp::Grounded, prompt).await?;
        Ok(self
            .grounded_by_prompt
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or_else(|| self.grounded.clone(), |(_, r)| r.clone()))
    }

    async fn generate_image(&self, prompt: &str) -> Result<InlineImage> {
        let now = self.images_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_images_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.enter(BackendOp::Image, prompt).await;
        self.images_in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|()| self.image.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
