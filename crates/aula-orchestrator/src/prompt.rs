//! Prompt construction for remote calls.
//!
//! Image prompts are translated to English with a fixed domain dictionary and
//! finished with a level-specific style suffix. The transformation is pure so
//! the same title always yields the same prompt.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::resource::{DiagramType, EducationLevel, LevelContext};

/// Qualifier closing every image style suffix.
pub const IMAGE_QUALIFIER: &str = "educational, school-appropriate, high quality";

/// Spanish to English domain vocabulary. Multi-word phrases are applied before
/// single words regardless of their position here.
const DICTIONARY: &[(&str, &str)] = &[
    // Phrases
    ("ciclo del agua", "water cycle"),
    ("sistema solar", "solar system"),
    ("cadena alimenticia", "food chain"),
    ("cadena alimentaria", "food chain"),
    ("cuerpo humano", "human body"),
    ("sistema digestivo", "digestive system"),
    ("sistema respiratorio", "respiratory system"),
    ("estados de la materia", "states of matter"),
    ("seres vivos", "living things"),
    ("ciclo de vida", "life cycle"),
    ("medio ambiente", "environment"),
    // Science
    ("fotosíntesis", "photosynthesis"),
    ("ecosistema", "ecosystem"),
    ("ecosistemas", "ecosystems"),
    ("planeta", "planet"),
    ("planetas", "planets"),
    ("sol", "sun"),
    ("luna", "moon"),
    ("tierra", "earth"),
    ("agua", "water"),
    ("aire", "air"),
    ("planta", "plant"),
    ("plantas", "plants"),
    ("animales", "animals"),
    ("célula", "cell"),
    ("células", "cells"),
    ("volcán", "volcano"),
    ("volcanes", "volcanoes"),
    ("montaña", "mountain"),
    ("montañas", "mountains"),
    ("río", "river"),
    ("ríos", "rivers"),
    ("mar", "sea"),
    ("océano", "ocean"),
    ("bosque", "forest"),
    ("selva", "rainforest"),
    ("desierto", "desert"),
    ("lluvia", "rain"),
    ("nube", "cloud"),
    ("nubes", "clouds"),
    ("clima", "climate"),
    ("energía", "energy"),
    ("materia", "matter"),
    ("ciclo", "cycle"),
    ("vida", "life"),
    ("mariposa", "butterfly"),
    ("semilla", "seed"),
    ("flor", "flower"),
    ("flores", "flowers"),
    ("árbol", "tree"),
    ("árboles", "trees"),
    ("insectos", "insects"),
    ("dinosaurios", "dinosaurs"),
    ("corazón", "heart"),
    ("huesos", "bones"),
    ("partes", "parts"),
    // Mathematics
    ("fracciones", "fractions"),
    ("números", "numbers"),
    ("suma", "addition"),
    ("resta", "subtraction"),
    ("multiplicación", "multiplication"),
    ("división", "division"),
    ("geometría", "geometry"),
    ("triángulo", "triangle"),
    ("círculo", "circle"),
    // Social studies
    ("mapa", "map"),
    ("historia", "history"),
    ("independencia", "independence"),
    ("revolución", "revolution"),
    ("ciudad", "city"),
    ("familia", "family"),
    ("escuela", "school"),
    ("niños", "children"),
    ("niño", "child"),
    // Function words
    ("del", "of the"),
    ("de", "of"),
    ("la", "the"),
    ("el", "the"),
    ("los", "the"),
    ("las", "the"),
    ("un", "a"),
    ("una", "a"),
    ("y", "and"),
    ("en", "in"),
    ("con", "with"),
    ("para", "for"),
];

/// Compiled whole-word rules, longest phrases first.
static RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let mut entries: Vec<&(&str, &str)> = DICTIONARY.iter().collect();
    // Stable sort keeps dictionary order among phrases of equal length.
    entries.sort_by_key(|(term, _)| std::cmp::Reverse(term.split_whitespace().count()));
    entries
        .into_iter()
        .filter_map(|(term, english)| {
            Regex::new(&format!(r"\b{}\b", regex::escape(term)))
                .ok()
                .map(|re| (re, *english))
        })
        .collect()
});

/// Returns the visual style for a level, without the shared qualifier.
#[must_use]
pub const fn level_style(level: EducationLevel) -> &'static str {
    match level {
        EducationLevel::Inicial => {
            "playful cartoon illustration for young children, bright colors, simple rounded shapes"
        }
        EducationLevel::Primaria => {
            "clean colorful educational illustration, clear shapes, friendly style"
        }
        EducationLevel::Secundaria => {
            "detailed infographic diagram style, precise labels, clean layout"
        }
    }
}

/// Returns the full suffix every image prompt for `level` ends with.
#[must_use]
pub fn style_suffix(level: EducationLevel) -> String {
    format!("{}, {IMAGE_QUALIFIER}", level_style(level))
}

/// Lowercases, collapses whitespace, and applies the domain dictionary.
#[must_use]
pub fn translate_terms(text: &str) -> String {
    let mut out = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    for (rule, english) in RULES.iter() {
        if rule.is_match(&out) {
            out = rule.replace_all(&out, *english).into_owned();
        }
    }
    out
}

/// Builds the English image-generation prompt for `source` at `level`.
///
/// ```
/// use aula_orchestrator::prompt::{english_image_prompt, style_suffix};
/// use aula_orchestrator::EducationLevel;
///
/// let prompt = english_image_prompt("Ciclo del agua", EducationLevel::Inicial);
/// assert!(prompt.contains("cycle"));
/// assert!(prompt.ends_with(&style_suffix(EducationLevel::Inicial)));
/// ```
#[must_use]
pub fn english_image_prompt(source: &str, level: EducationLevel) -> String {
    let subject = translate_terms(source);
    let suffix = style_suffix(level);
    if subject.is_empty() {
        suffix
    } else {
        format!("{subject}, {suffix}")
    }
}

/// Picks the instruction, or the title when the instruction is blank.
#[must_use]
pub fn image_source_text<'a>(instruction: &'a str, title: &'a str) -> &'a str {
    if instruction.trim().is_empty() {
        title
    } else {
        instruction
    }
}

/// Instruction asking the text backend for diagram source plus a fallback.
#[must_use]
pub fn diagram_prompt(description: &str, diagram_type: DiagramType, context: &LevelContext) -> String {
    format!(
        "You are creating a diagram for a {level} lesson{grade}{subject}.\n\
         Diagram type: {diagram_type}. The Mermaid source must start with `{header}`.\n\
         What to diagram: {description}\n\n\
         Write node labels in Spanish, short and suitable for the audience. \
         Avoid characters that break Mermaid syntax (quotes, parentheses inside labels).\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"mermaid\": \"<Mermaid source>\", \"description\": \"<plain-text description of the diagram in Spanish>\"}}",
        level = context.level,
        grade = if context.grade.is_empty() {
            String::new()
        } else {
            format!(", grade {}", context.grade)
        },
        subject = if context.subject_area.is_empty() {
            String::new()
        } else {
            format!(", subject {}", context.subject_area)
        },
        header = diagram_type.mermaid_header(),
    )
}

/// Search instruction for an educational video.
#[must_use]
pub fn video_search_prompt(query: &str) -> String {
    format!(
        "Find one educational YouTube video suitable for school students about: {query}.\n\
         Prefer videos from educational channels, in Spanish when available, \
         under 15 minutes long. Reply with the video title and its full URL."
    )
}

/// Search instruction for a real photograph.
#[must_use]
pub fn image_search_prompt(query: &str) -> String {
    format!(
        "Find one real photograph (not an illustration) about: {query}.\n\
         Prefer freely licensed sources such as Wikimedia Commons or Unsplash. \
         Reply with the page title and the full URL of the image page."
    )
}
