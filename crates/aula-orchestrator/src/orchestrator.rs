//! Fan-out driver for a resolution batch.
//!
//! [`Orchestrator::process_all`] marks every resource `loading`, then runs one
//! future per resource through a kind-specific handler. All futures are
//! driven together with `join_all`; a failure settles only its own resource
//! as `error` and never reaches siblings or the caller.

use std::sync::Arc;

use aula_backend::{GenerativeBackend, ResponseFormat};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{AulaError, Result};
use crate::links::{ExternalLink, LinkKind, LinkResolver};
use crate::placeholder::{
    attribution_for, image_search_url, placeholder_url, youtube_search_url,
    GENERATED_ATTRIBUTION, IMAGE_SEARCH_ATTRIBUTION, VIDEO_ATTRIBUTION,
};
use crate::prompt::{diagram_prompt, image_source_text};
use crate::resolver::generate_image_artifact;
use crate::resource::{
    validate_requests, Artifact, DiagramType, LevelContext, ResolvedResource, ResourceKind,
    ResourceRequest, ResourceStatus,
};
use crate::retry::RetryPolicy;
use crate::sink::{ResourceUpdate, UpdateSink};

/// Summary of a finished batch. Callers normally watch the sink instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// Final resources in request order.
    pub resources: Vec<ResolvedResource>,
    /// Resources that ended `ready`.
    pub ready: usize,
    /// Resources that ended `error`.
    pub failed: usize,
}

/// Payload produced by a successful handler.
struct Handled {
    artifact: Artifact,
    thumbnail_url: Option<String>,
    attribution: String,
}

/// Shape the text backend is asked to return for diagrams.
#[derive(Debug, Deserialize)]
struct DiagramPayload {
    #[serde(default)]
    mermaid: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Dispatches each resource of a batch to its kind handler.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn GenerativeBackend>,
    links: LinkResolver,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Creates an orchestrator. Every remote call goes through `retry`.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerativeBackend>, retry: RetryPolicy) -> Self {
        Self {
            links: LinkResolver::new(backend.clone(), retry),
            backend,
            retry,
        }
    }

    /// Creates an orchestrator using the `retry` config section.
    #[must_use]
    pub fn from_config(backend: Arc<dyn GenerativeBackend>, config: &Config) -> Self {
        Self::new(backend, RetryPolicy::from_config(&config.retry))
    }

    /// Resolves a whole batch, streaming every state change into `sink`.
    ///
    /// Emits `loading` for every resource before any remote call, then
    /// exactly one `ready` or `error` per resource in completion order.
    ///
    /// # Errors
    ///
    /// Only batch validation failures (blank, duplicate ids or titles) are
    /// returned, before anything is emitted.
    #[instrument(skip_all, fields(resources = resources.len(), level = %context.level))]
    pub async fn process_all(
        &self,
        resources: &[ResourceRequest],
        context: &LevelContext,
        sink: &dyn UpdateSink,
    ) -> Result<BatchOutcome> {
        validate_requests(resources)?;

        let loading = resources
            .iter()
            .map(|r| ResolvedResource::pending(r.clone()).begin_loading())
            .collect::<Result<Vec<_>>>()?;
        for resource in &loading {
            sink.emit(ResourceUpdate::new(resource.clone()));
        }
        info!("All resources loading");

        let settled = join_all(
            loading
                .into_iter()
                .map(|resource| self.settle(resource, context, sink)),
        )
        .await;

        let ready = settled
            .iter()
            .filter(|r| r.status == ResourceStatus::Ready)
            .count();
        let failed = settled.len() - ready;
        info!(ready, failed, "Batch complete");

        Ok(BatchOutcome {
            resources: settled,
            ready,
            failed,
        })
    }

    /// Re-resolves a single resource (the per-resource retry affordance).
    ///
    /// Emits `loading` and then one terminal update, like `process_all`.
    ///
    /// # Errors
    ///
    /// Returns `MissingResourceId` if the request has a blank id.
    pub async fn process_one(
        &self,
        request: &ResourceRequest,
        context: &LevelContext,
        sink: &dyn UpdateSink,
    ) -> Result<ResolvedResource> {
        validate_requests(std::slice::from_ref(request))?;
        let loading = ResolvedResource::pending(request.clone()).begin_loading()?;
        sink.emit(ResourceUpdate::new(loading.clone()));
        Ok(self.settle(loading, context, sink).await)
    }

    /// Runs the handler for a resource already marked `loading` and emits
    /// only its terminal update.
    ///
    /// Used when the `loading` state was claimed elsewhere, such as
    /// [`ResourceBoard::begin_retry`](crate::ResourceBoard::begin_retry).
    pub async fn settle(
        &self,
        loading: ResolvedResource,
        context: &LevelContext,
        sink: &dyn UpdateSink,
    ) -> ResolvedResource {
        let request = &loading.request;
        debug!(resource_id = %request.id, kind = request.kind.type_name(), "Dispatching");

        let transition = match self.handle(request, context).await {
            Ok(handled) => loading.resolve(handled.artifact).map(|r| {
                let r = r.with_attribution(handled.attribution);
                match handled.thumbnail_url {
                    Some(url) => r.with_thumbnail(url),
                    None => r,
                }
            }),
            Err(e) => {
                warn!(resource_id = %request.id, error = %e, "Resource failed");
                loading.fail(e.resource_message()).map(|r| {
                    r.with_thumbnail(placeholder_url(&request.kind, &request.title))
                        .with_attribution(attribution_for(&request.kind))
                })
            }
        };

        let settled = transition.unwrap_or_else(|e| {
            error!(resource_id = %request.id, error = %e, "Could not settle resource");
            ResolvedResource {
                status: ResourceStatus::Error,
                artifact: None,
                error: Some(e.resource_message()),
                ..loading.clone()
            }
        });

        sink.emit(ResourceUpdate::new(settled.clone()));
        settled
    }

    async fn handle(&self, request: &ResourceRequest, context: &LevelContext) -> Result<Handled> {
        match &request.kind {
            ResourceKind::GeneratedImage { prompt } => {
                self.generate_image(prompt, &request.title, context).await
            }
            ResourceKind::GeneratedDiagram {
                description,
                diagram_type,
            } => {
                self.generate_diagram(request, description, *diagram_type, context)
                    .await
            }
            ResourceKind::SearchedVideo { query } => {
                Ok(self.search_video(request, image_source_text(query, &request.title)).await)
            }
            ResourceKind::SearchedImage { query } => {
                Ok(self.search_image(request, image_source_text(query, &request.title)).await)
            }
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    async fn generate_image(
        &self,
        instruction: &str,
        title: &str,
        context: &LevelContext,
    ) -> Result<Handled> {
        let artifact = generate_image_artifact(
            self.backend.as_ref(),
            &self.retry,
            instruction,
            title,
            context.level,
        )
        .await?;
        Ok(Handled {
            artifact,
            thumbnail_url: None,
            attribution: GENERATED_ATTRIBUTION.to_string(),
        })
    }

    async fn generate_diagram(
        &self,
        request: &ResourceRequest,
        description: &str,
        diagram_type: DiagramType,
        context: &LevelContext,
    ) -> Result<Handled> {
        let prompt = diagram_prompt(description, diagram_type, context);
        let text = self
            .retry
            .execute(|| self.backend.generate_content(&prompt, ResponseFormat::Json))
            .await?;
        let (source, fallback) = parse_diagram_response(&text, description)?;
        Ok(Handled {
            artifact: Artifact::Diagram { source, fallback },
            thumbnail_url: Some(placeholder_url(&request.kind, &request.title)),
            attribution: GENERATED_ATTRIBUTION.to_string(),
        })
    }

    async fn search_video(&self, request: &ResourceRequest, query: &str) -> Handled {
        match self.links.resolve_link(query, LinkKind::Video).await {
            Some(ExternalLink { title, url }) => Handled {
                thumbnail_url: Some(
                    youtube_thumbnail(&url)
                        .unwrap_or_else(|| placeholder_url(&request.kind, &request.title)),
                ),
                attribution: format!("{VIDEO_ATTRIBUTION}: {title}"),
                artifact: Artifact::Link { url },
            },
            None => Handled {
                artifact: Artifact::Link {
                    url: youtube_search_url(query),
                },
                thumbnail_url: Some(placeholder_url(&request.kind, &request.title)),
                attribution: VIDEO_ATTRIBUTION.to_string(),
            },
        }
    }

    async fn search_image(&self, request: &ResourceRequest, query: &str) -> Handled {
        match self.links.resolve_link(query, LinkKind::Image).await {
            Some(ExternalLink { title, url }) => Handled {
                thumbnail_url: Some(if looks_like_image_file(&url) {
                    url.clone()
                } else {
                    placeholder_url(&request.kind, &request.title)
                }),
                attribution: title,
                artifact: Artifact::Link { url },
            },
            None => Handled {
                artifact: Artifact::Link {
                    url: image_search_url(query),
                },
                thumbnail_url: Some(placeholder_url(&request.kind, &request.title)),
                attribution: IMAGE_SEARCH_ATTRIBUTION.to_string(),
            },
        }
    }
}

/// Extracts `(mermaid source, fallback text)` from the backend's JSON reply.
///
/// Tolerates a surrounding Markdown code fence. A missing or blank `mermaid`
/// field is a malformed response. A blank description falls back to
/// `default_fallback`.
fn parse_diagram_response(text: &str, default_fallback: &str) -> Result<(String, String)> {
    let body = strip_code_fence(text);
    let payload: DiagramPayload = serde_json::from_str(body)
        .map_err(|e| AulaError::malformed("mermaid", format!("response is not valid JSON: {e}")))?;

    let source = payload
        .mermaid
        .map(|m| strip_code_fence(&m).to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AulaError::malformed("mermaid", "is missing or empty"))?;

    let fallback = payload
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| default_fallback.trim().to_string());

    Ok((source, fallback))
}

/// Removes a leading ```lang line and trailing ``` if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Standard thumbnail for a YouTube watch, short, or embed URL.
fn youtube_thumbnail(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let video_id = match host {
        "youtube.com" => {
            let path = parsed.path();
            if path == "/watch" {
                parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())
            } else {
                path.strip_prefix("/embed/")
                    .or_else(|| path.strip_prefix("/shorts/"))
                    .map(ToString::to_string)
            }
        }
        "youtu.be" => Some(parsed.path().trim_start_matches('/').to_string()),
        _ => None,
    }?;
    if video_id.is_empty() || video_id.contains('/') {
        return None;
    }
    Some(format!("https://img.youtube.com/vi/{video_id}/hqdefault.jpg"))
}

/// Returns `true` when the URL path ends in a common image extension.
fn looks_like_image_file(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| {
        let path = u.path().to_lowercase();
        [".jpg", ".jpeg", ".png", ".webp", ".gif", ".svg"]
            .iter()
            .any(|ext| path.ends_with(ext))
    })
}
