//! External link resolution through grounded search.
//!
//! [`LinkResolver::resolve_link`] turns a free-text query into one real URL.
//! Not finding anything is an expected outcome and is reported as `None`;
//! backend failures are logged and reported the same way.

use std::sync::Arc;

use aula_backend::{Citation, GenerativeBackend};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::prompt::{image_search_prompt, video_search_prompt};
use crate::retry::RetryPolicy;

/// First http(s) URL in free text. Trailing punctuation is trimmed afterwards.
static URL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'()\[\]{}`]+"#).ok());

/// What kind of link to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// An educational video.
    Video,
    /// A real photograph.
    Image,
}

impl LinkKind {
    fn search_prompt(self, query: &str) -> String {
        match self {
            Self::Video => video_search_prompt(query),
            Self::Image => image_search_prompt(query),
        }
    }
}

/// A resolved external link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    /// Page title, or the original query on the text fallback path.
    pub title: String,
    /// Absolute http(s) URL.
    pub url: String,
}

/// Resolves search queries to URLs via the backend's grounded generation.
#[derive(Clone)]
pub struct LinkResolver {
    backend: Arc<dyn GenerativeBackend>,
    retry: RetryPolicy,
}

impl LinkResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerativeBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Finds the best URL for `query`, or `None` if there is none.
    pub async fn resolve_link(&self, query: &str, kind: LinkKind) -> Option<ExternalLink> {
        let prompt = kind.search_prompt(query);
        let response = match self
            .retry
            .execute(|| self.backend.generate_grounded(&prompt))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(query, ?kind, error = %e, "Link search failed");
                return None;
            }
        };

        if let Some(link) = first_citation(&response.citations) {
            debug!(query, url = %link.url, "Link found in grounding citations");
            return Some(link);
        }

        if let Some(url) = first_url_in_text(&response.text) {
            debug!(query, url = %url, "Link found in response text");
            return Some(ExternalLink {
                title: query.to_string(),
                url,
            });
        }

        debug!(query, ?kind, "No link found");
        None
    }
}

/// Returns `true` for absolute http(s) URLs with a host.
fn is_usable_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// First citation with a usable URL and a non-empty title.
fn first_citation(citations: &[Citation]) -> Option<ExternalLink> {
    citations
        .iter()
        .find(|c| !c.title.trim().is_empty() && is_usable_url(c.url.trim()))
        .map(|c| ExternalLink {
            title: c.title.trim().to_string(),
            url: c.url.trim().to_string(),
        })
}

/// First well-formed URL substring of `text`.
fn first_url_in_text(text: &str) -> Option<String> {
    let pattern = URL_PATTERN.as_ref()?;
    pattern
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '*']))
        .find(|candidate| is_usable_url(candidate))
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use aula_backend::testing::{BackendOp, FakeBackend};
    use aula_backend::{BackendError, GroundedResponse};

    use super::*;

    fn resolver(backend: FakeBackend) -> (Arc<FakeBackend>, LinkResolver) {
        let backend = Arc::new(backend);
        let resolver = LinkResolver::new(backend.clone(), RetryPolicy::none());
        (backend, resolver)
    }

    #[test]
    fn test_first_citation_skips_unusable() {
        let citations = vec![
            Citation::new("not a url", "Bad"),
            Citation::new("ftp://example.org/file", "Wrong scheme"),
            Citation::new("https://example.org/untitled", "  "),
            Citation::new("https://www.youtube.com/watch?v=abc", "Good"),
        ];
        let link = first_citation(&citations).unwrap();
        assert_eq!(link.title, "Good");
        assert_eq!(link.url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_first_url_in_text_trims_punctuation() {
        let text = "Try this one: https://www.youtube.com/watch?v=xyz. It is great!";
        assert_eq!(
            first_url_in_text(text).unwrap(),
            "https://www.youtube.com/watch?v=xyz"
        );
    }

    #[test]
    fn test_first_url_in_text_markdown_link() {
        let text = "[Volcanes](https://commons.wikimedia.org/wiki/File:Volcano.jpg)";
        assert_eq!(
            first_url_in_text(text).unwrap(),
            "https://commons.wikimedia.org/wiki/File:Volcano.jpg"
        );
    }

    #[test]
    fn test_first_url_in_text_none() {
        assert!(first_url_in_text("I could not find anything.").is_none());
        assert!(first_url_in_text("http://").is_none());
    }

    #[tokio::test]
    async fn test_resolve_link_prefers_citation() {
        let (backend, resolver) = resolver(FakeBackend::new().with_grounded(
            GroundedResponse::text("see https://example.org/from-text")
                .with_citation(Citation::new("https://example.org/cited", "Cited page")),
        ));
        let link = resolver.resolve_link("volcanes", LinkKind::Video).await.unwrap();
        assert_eq!(link.url, "https://example.org/cited");
        assert_eq!(link.title, "Cited page");
        assert_eq!(backend.call_count(BackendOp::Grounded), 1);
        assert!(backend.calls()[0].prompt.contains("YouTube"));
    }

    #[tokio::test]
    async fn test_resolve_link_falls_back_to_text() {
        let (_, resolver) = resolver(
            FakeBackend::new()
                .with_grounded(GroundedResponse::text("Photo: https://unsplash.com/photos/abc")),
        );
        let link = resolver.resolve_link("volcanes", LinkKind::Image).await.unwrap();
        assert_eq!(link.url, "https://unsplash.com/photos/abc");
        assert_eq!(link.title, "volcanes");
    }

    #[tokio::test]
    async fn test_resolve_link_not_found() {
        let (_, resolver) =
            resolver(FakeBackend::new().with_grounded(GroundedResponse::text("Nothing found.")));
        assert!(resolver.resolve_link("xyz", LinkKind::Video).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_link_backend_error_is_none() {
        let (backend, resolver) = resolver(
            FakeBackend::new().fail_always(BackendOp::Grounded, BackendError::api(500, "down")),
        );
        assert!(resolver.resolve_link("xyz", LinkKind::Image).await.is_none());
        assert_eq!(backend.call_count(BackendOp::Grounded), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_link_retries_transient_failure() {
        let backend = Arc::new(
            FakeBackend::new().fail_first(BackendOp::Grounded, 1, BackendError::api(503, "busy")),
        );
        let resolver = LinkResolver::new(
            backend.clone(),
            RetryPolicy::new(3, Duration::from_millis(100)),
        );
        assert!(resolver.resolve_link("volcanes", LinkKind::Video).await.is_some());
        assert_eq!(backend.call_count(BackendOp::Grounded), 2);
    }
}
