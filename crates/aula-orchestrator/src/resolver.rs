//! Per-kind resource resolution with windowed image generation.
//!
//! [`Resolver::resolve_all`] partitions a batch into generated images, which
//! hit the rate-limited image model, and everything else. Everything else
//! starts at once. Images run in fixed windows of
//! `resolver.maxConcurrentGenerations`: the next window starts only after the
//! previous one has fully completed.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use aula_backend::GenerativeBackend;
use futures::future::{join, join_all};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{AulaError, Result};
use crate::placeholder::{
    attribution_for, placeholder_url, youtube_search_embed, GENERATED_ATTRIBUTION,
    GENERIC_ATTRIBUTION, VIDEO_ATTRIBUTION,
};
use crate::prompt::{english_image_prompt, image_source_text};
use crate::resource::{
    validate_requests, Artifact, EducationLevel, LevelContext, ResolvedResource, ResourceKind,
    ResourceRequest,
};
use crate::retry::RetryPolicy;

// ============================================================================
// GenerationWindow
// ============================================================================

/// Fixed-size, sequential concurrency windows.
///
/// Up to `size` operations run together; the next group is admitted only
/// after every operation of the current group has finished. This is not a
/// sliding pool: a slow member holds back the whole next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationWindow {
    size: NonZeroUsize,
}

impl Default for GenerationWindow {
    fn default() -> Self {
        Self::new(2)
    }
}

impl GenerationWindow {
    /// Creates a window admitting `size` operations at once (zero means one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size: NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Operations admitted per window.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size.get()
    }

    /// Runs `op` over `items` window by window, returning outputs in input order.
    pub async fn run<I, F, Fut, T>(&self, items: I, mut op: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut items = items.into_iter();
        let mut outputs = Vec::new();
        loop {
            let window: Vec<Fut> = items.by_ref().take(self.size()).map(&mut op).collect();
            if window.is_empty() {
                break;
            }
            outputs.extend(join_all(window).await);
        }
        outputs
    }
}

// ============================================================================
// Image generation
// ============================================================================

/// Generates the image for a request through `retry`, returning an inline artifact.
pub(crate) async fn generate_image_artifact(
    backend: &dyn GenerativeBackend,
    retry: &RetryPolicy,
    instruction: &str,
    title: &str,
    level: EducationLevel,
) -> Result<Artifact> {
    let prompt = english_image_prompt(image_source_text(instruction, title), level);
    let image = retry
        .execute(|| backend.generate_image(&prompt))
        .await?;
    if image.data.is_empty() {
        return Err(AulaError::malformed("data", "is empty"));
    }
    Ok(image.into())
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves resource requests into artifacts.
#[derive(Clone)]
pub struct Resolver {
    backend: Arc<dyn GenerativeBackend>,
    retry: RetryPolicy,
    window: GenerationWindow,
}

impl Resolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerativeBackend>, retry: RetryPolicy, window: GenerationWindow) -> Self {
        Self {
            backend,
            retry,
            window,
        }
    }

    /// Creates a resolver using the `retry` and `resolver` config sections.
    #[must_use]
    pub fn from_config(backend: Arc<dyn GenerativeBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            RetryPolicy::from_config(&config.retry),
            GenerationWindow::new(config.resolver.max_concurrent_generations),
        )
    }

    /// Returns the image-generation window.
    #[must_use]
    pub const fn window(&self) -> GenerationWindow {
        self.window
    }

    /// Resolves every request, returning results in request order.
    ///
    /// # Errors
    ///
    /// Returns a batch validation error (blank, duplicate ids or titles)
    /// before any remote call is made. Per-resource failures are reported as
    /// `error` status, never as `Err`.
    #[instrument(skip_all, fields(resources = requests.len(), level = %context.level))]
    pub async fn resolve_all(
        &self,
        requests: &[ResourceRequest],
        context: &LevelContext,
    ) -> Result<Vec<ResolvedResource>> {
        validate_requests(requests)?;

        let (images, others): (Vec<&ResourceRequest>, Vec<&ResourceRequest>) =
            requests.iter().partition(|r| r.kind.is_generated_image());
        info!(
            images = images.len(),
            others = others.len(),
            window = self.window.size(),
            "Resolving batch"
        );

        let others = join_all(others.into_iter().map(|r| self.resolve_resource(r, context)));
        let images = self
            .window
            .run(images, |r| self.resolve_resource(r, context));
        let (others, images) = join(others, images).await;

        let mut by_id: HashMap<String, ResolvedResource> = HashMap::with_capacity(requests.len());
        for resolved in others.into_iter().chain(images) {
            let resolved = resolved?;
            by_id.insert(resolved.id().to_string(), resolved);
        }

        Ok(merge_in_order(requests, by_id))
    }

    /// Resolves a single request.
    ///
    /// A request carrying `source.resolvedUrl` is ready immediately with no
    /// remote call. Failures become `error` status with a placeholder
    /// thumbnail and attribution still attached.
    ///
    /// # Errors
    ///
    /// Only an internal state-machine violation is returned as `Err`.
    pub async fn resolve_resource(
        &self,
        request: &ResourceRequest,
        context: &LevelContext,
    ) -> Result<ResolvedResource> {
        let base = ResolvedResource::pending(request.clone());
        let placeholder = placeholder_url(&request.kind, &request.title);

        if let Some(url) = request.resolved_url() {
            debug!(resource_id = %request.id, "Using previously resolved URL");
            let source = request.source.clone().unwrap_or_default();
            return Ok(base
                .resolve(Artifact::Link {
                    url: url.to_string(),
                })?
                .with_thumbnail(source.thumbnail_url.unwrap_or(placeholder))
                .with_attribution(
                    source
                        .attribution
                        .unwrap_or_else(|| attribution_for(&request.kind).to_string()),
                ));
        }

        let resolved = match &request.kind {
            ResourceKind::SearchedVideo { query } => base
                .resolve(Artifact::Link {
                    url: youtube_search_embed(image_source_text(query, &request.title)),
                })?
                .with_thumbnail(placeholder)
                .with_attribution(VIDEO_ATTRIBUTION),
            ResourceKind::GeneratedImage { prompt } => {
                match generate_image_artifact(
                    self.backend.as_ref(),
                    &self.retry,
                    prompt,
                    &request.title,
                    context.level,
                )
                .await
                {
                    Ok(artifact) => base
                        .resolve(artifact)?
                        .with_attribution(GENERATED_ATTRIBUTION),
                    Err(e) => {
                        warn!(resource_id = %request.id, error = %e, "Image generation failed");
                        base.fail(e.resource_message())?
                            .with_thumbnail(placeholder)
                            .with_attribution(GENERATED_ATTRIBUTION)
                    }
                }
            }
            ResourceKind::GeneratedDiagram { .. } | ResourceKind::SearchedImage { .. } => base
                .resolve(Artifact::Link {
                    url: placeholder.clone(),
                })?
                .with_thumbnail(placeholder)
                .with_attribution(GENERIC_ATTRIBUTION),
        };

        debug!(
            resource_id = %request.id,
            kind = request.kind.type_name(),
            status = %resolved.status,
            "Resource resolved"
        );
        Ok(resolved)
    }
}

/// Reassembles results in request order.
///
/// Ids are validated unique before dispatch, so every request has a result;
/// a missing one is kept visible as `pending` rather than dropped.
fn merge_in_order(
    requests: &[ResourceRequest],
    mut by_id: HashMap<String, ResolvedResource>,
) -> Vec<ResolvedResource> {
    requests
        .iter()
        .map(|request| {
            by_id.remove(&request.id).unwrap_or_else(|| {
                warn!(resource_id = %request.id, "No result for resource, leaving pending");
                ResolvedResource::pending(request.clone())
            })
        })
        .collect()
}
