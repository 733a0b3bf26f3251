//! Deterministic placeholder thumbnails, attributions, and search URLs.
//!
//! Every resource the UI shows has a visual, even when resolution fails, so
//! each kind gets a themed placeholder derived only from its title.

use crate::resource::ResourceKind;

/// Attribution for AI-generated artifacts.
pub const GENERATED_ATTRIBUTION: &str = "Generado con IA";

/// Attribution for synthesized YouTube search embeds.
pub const VIDEO_ATTRIBUTION: &str = "YouTube";

/// Attribution for searched photographs.
pub const IMAGE_SEARCH_ATTRIBUTION: &str = "Búsqueda de imágenes";

/// Attribution for resources that carry only a placeholder.
pub const GENERIC_ATTRIBUTION: &str = "Recurso educativo";

const PLACEHOLDER_BASE: &str = "https://placehold.co/640x360";

/// Background and foreground colors for a kind.
const fn theme(kind: &ResourceKind) -> (&'static str, &'static str) {
    match kind {
        ResourceKind::GeneratedImage { .. } => ("FDE68A", "92400E"),
        ResourceKind::GeneratedDiagram { .. } => ("BFDBFE", "1E3A8A"),
        ResourceKind::SearchedVideo { .. } => ("FECACA", "7F1D1D"),
        ResourceKind::SearchedImage { .. } => ("BBF7D0", "14532D"),
    }
}

/// Builds the kind-themed placeholder thumbnail URL for `title`.
#[must_use]
pub fn placeholder_url(kind: &ResourceKind, title: &str) -> String {
    let (bg, fg) = theme(kind);
    let label = if title.trim().is_empty() {
        kind.type_name().replace('_', " ")
    } else {
        title.trim().to_string()
    };
    format!(
        "{PLACEHOLDER_BASE}/{bg}/{fg}?text={}",
        urlencoding::encode(&label)
    )
}

/// Returns the default attribution for a kind.
#[must_use]
pub const fn attribution_for(kind: &ResourceKind) -> &'static str {
    match kind {
        ResourceKind::GeneratedImage { .. } | ResourceKind::GeneratedDiagram { .. } => {
            GENERATED_ATTRIBUTION
        }
        ResourceKind::SearchedVideo { .. } => VIDEO_ATTRIBUTION,
        ResourceKind::SearchedImage { .. } => IMAGE_SEARCH_ATTRIBUTION,
    }
}

/// Embeddable YouTube player that runs a search for `query`.
#[must_use]
pub fn youtube_search_embed(query: &str) -> String {
    format!(
        "https://www.youtube.com/embed?listType=search&list={}",
        urlencoding::encode(query.trim())
    )
}

/// YouTube results page for `query`.
#[must_use]
pub fn youtube_search_url(query: &str) -> String {
    format!(
        "https://www.youtube.com/results?search_query={}",
        urlencoding::encode(query.trim())
    )
}

/// Image search results page for `query`.
#[must_use]
pub fn image_search_url(query: &str) -> String {
    format!(
        "https://www.google.com/search?tbm=isch&q={}",
        urlencoding::encode(query.trim())
    )
}
