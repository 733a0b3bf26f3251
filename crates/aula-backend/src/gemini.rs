//! Gemini REST client for Aula.
//!
//! This module provides the [`GeminiClient`] struct, a [`GenerativeBackend`]
//! implementation over the `models/{model}:generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    BackendError, Citation, GenerativeBackend, GroundedResponse, InlineImage, ResponseFormat,
    Result,
};

/// Default REST endpoint for the Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model for text, JSON, and grounded calls.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Default model for image generation.
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini API client.
///
/// # Example
///
/// ```no_run
/// use aula_backend::{GeminiClient, GenerativeBackend, ResponseFormat};
///
/// # async fn example() -> aula_backend::Result<()> {
/// let client = GeminiClient::from_env("GEMINI_API_KEY")?;
/// let text = client
///     .generate_content("Summarize photosynthesis", ResponseFormat::Text)
///     .await?;
/// println!("{text}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    /// Creates a client with default models and timeout.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom per-request timeout.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::Config("API key must not be empty".to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        })
    }

    /// Creates a client reading the API key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let api_key =
            std::env::var(var).map_err(|_| BackendError::Config(format!("{var} not set")))?;
        Self::new(api_key)
    }

    /// Sets a custom base URL (proxies, regional endpoints, test servers).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the text and image model names.
    #[must_use]
    pub fn with_models(mut self, text_model: impl Into<String>, image_model: impl Into<String>) -> Self {
        self.text_model = text_model.into();
        self.image_model = image_model.into();
        self
    }

    /// Returns the model used for text calls.
    #[must_use]
    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    /// Returns the model used for image calls.
    #[must_use]
    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    async fn post(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let start = std::time::Instant::now();
        let url = format!("{}/models/{model}:generateContent", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, model, "Gemini request failed");
                BackendError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model, "Gemini API error");
            return Err(BackendError::api(status.as_u16(), body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        debug!(
            model,
            duration_ms = start.elapsed().as_millis(),
            "Gemini generateContent"
        );

        Ok(parsed)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.text_model, prompt_len = prompt.len()))]
    async fn generate_content(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        let request = GenerateRequest::prompt(prompt).with_format(format);
        let response = self.post(&self.text_model, &request).await?;
        extract_text(&response).ok_or_else(|| BackendError::EmptyResponse("text".to_string()))
    }

    #[instrument(skip(self, prompt), fields(model = %self.text_model, prompt_len = prompt.len()))]
    async fn generate_grounded(&self, prompt: &str) -> Result<GroundedResponse> {
        let request = GenerateRequest::prompt(prompt).with_search_grounding();
        let response = self.post(&self.text_model, &request).await?;
        Ok(GroundedResponse {
            text: extract_text(&response).unwrap_or_default(),
            citations: extract_citations(&response),
        })
    }

    #[instrument(skip(self, prompt), fields(model = %self.image_model, prompt_len = prompt.len()))]
    async fn generate_image(&self, prompt: &str) -> Result<InlineImage> {
        let request = GenerateRequest::prompt(prompt).with_image_output();
        let response = self.post(&self.image_model, &request).await?;
        extract_image(&response).ok_or_else(|| BackendError::EmptyResponse("image data".to_string()))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

impl GenerateRequest {
    fn prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: None,
            tools: Vec::new(),
        }
    }

    fn with_format(mut self, format: ResponseFormat) -> Self {
        if format == ResponseFormat::Json {
            self.generation_config = Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_modalities: None,
            });
        }
        self
    }

    fn with_search_grounding(mut self) -> Self {
        self.tools.push(Tool {
            google_search: GoogleSearch {},
        });
        self
    }

    fn with_image_output(mut self) -> Self {
        self.generation_config = Some(GenerationConfig {
            response_mime_type: None,
            response_modalities: Some(vec!["IMAGE".to_string()]),
        });
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Clone, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Concatenates the text parts of the first candidate.
fn extract_text(response: &GenerateResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let text: String = candidate
        .content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Collects web citations of the first candidate, skipping chunks without a URI.
fn extract_citations(response: &GenerateResponse) -> Vec<Citation> {
    response
        .candidates
        .first()
        .and_then(|c| c.grounding_metadata.as_ref())
        .map(|meta| {
            meta.grounding_chunks
                .iter()
                .filter_map(|chunk| chunk.web.as_ref())
                .filter_map(|web| {
                    let uri = web.uri.as_deref()?;
                    Some(Citation::new(uri, web.title.clone().unwrap_or_default()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Returns the first inline image part of any candidate.
fn extract_image(response: &GenerateResponse) -> Option<InlineImage> {
    response
        .candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .filter_map(|part| part.inline_data.as_ref())
        .find(|blob| blob.mime_type.starts_with("image/") && !blob.data.is_empty())
        .map(|blob| InlineImage::new(&blob.mime_type, &blob.data))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn json_request_sets_response_mime_type() {
        let request = GenerateRequest::prompt("hi").with_format(ResponseFormat::Json);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""responseMimeType":"application/json""#));
        assert!(!json.contains("tools"));
    }

    #[test]
    fn text_request_has_no_generation_config() {
        let request = GenerateRequest::prompt("hi").with_format(ResponseFormat::Text);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("generationConfig"));
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn grounded_request_enables_google_search() {
        let request = GenerateRequest::prompt("hi").with_search_grounding();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""tools":[{"google_search":{}}]"#));
    }

    #[test]
    fn image_request_asks_for_image_modality() {
        let request = GenerateRequest::prompt("a cat").with_image_output();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""responseModalities":["IMAGE"]"#));
    }

    #[test]
    fn extract_text_joins_parts() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#,
        );
        assert_eq!(extract_text(&response).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn extract_text_empty_candidates() {
        assert!(extract_text(&parse(r#"{"candidates":[]}"#)).is_none());
        assert!(extract_text(&parse(r"{}")).is_none());
        assert!(
            extract_text(&parse(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#))
                .is_none()
        );
    }

    #[test]
    fn extract_citations_reads_grounding_chunks() {
        let response = parse(
            r#"{"candidates":[{
                "content":{"parts":[{"text":"Here you go"}]},
                "groundingMetadata":{"groundingChunks":[
                    {"retrievedContext":{}},
                    {"web":{"title":"no uri"}},
                    {"web":{"uri":"https://www.youtube.com/watch?v=abc","title":"Water cycle"}},
                    {"web":{"uri":"https://example.org/x"}}
                ]}
            }]}"#,
        );
        let citations = extract_citations(&response);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(citations[0].title, "Water cycle");
        assert_eq!(citations[1].title, "");
    }

    #[test]
    fn extract_citations_without_metadata() {
        let response = parse(r#"{"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#);
        assert!(extract_citations(&response).is_empty());
    }

    #[test]
    fn extract_image_finds_inline_data() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"Here is your image"},
                {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
            ]}}]}"#,
        );
        let image = extract_image(&response).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");
    }

    #[test]
    fn extract_image_ignores_non_image_blobs() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"inlineData":{"mimeType":"text/plain","data":"aGk="}}
            ]}}]}"#,
        );
        assert!(extract_image(&response).is_none());
    }

    #[test]
    fn new_rejects_blank_key() {
        let err = GeminiClient::new("   ").unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn builder_overrides() {
        let client = GeminiClient::new("key")
            .unwrap()
            .with_base_url("http://localhost:8080/")
            .with_models("text-model", "image-model");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.text_model(), "text-model");
        assert_eq!(client.image_model(), "image-model");
    }

    #[test]
    fn from_env_missing_variable() {
        let err = GeminiClient::from_env("AULA_TEST_UNSET_VARIABLE_XYZ").unwrap_err();
        assert!(err.to_string().contains("AULA_TEST_UNSET_VARIABLE_XYZ"));
    }
}
