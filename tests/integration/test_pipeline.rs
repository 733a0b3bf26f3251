//! End-to-end tests for both resolution modes against a fake backend.
//!
//! Covers batch file loading, ordering, windowed image generation, failure
//! isolation, and progressive delivery through channel and board sinks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aula_backend::testing::{BackendOp, FakeBackend};
use aula_backend::BackendError;
use aula_orchestrator::{
    Artifact, Config, EducationLevel, GenerationWindow, LevelContext, LessonMoment,
    Orchestrator, ResolutionBatch, ResolvedResource, ResourceBoard, ResourceKind,
    ResourceRequest, ResourceStatus, ResourceUpdate, Resolver, RetryPolicy,
};
use tokio::sync::mpsc;

fn image(title: &str, prompt: &str) -> ResourceRequest {
    ResourceRequest::new(
        "",
        title,
        LessonMoment::Development,
        ResourceKind::GeneratedImage {
            prompt: prompt.to_string(),
        },
    )
}

fn mixed_batch() -> ResolutionBatch {
    let mut batch = ResolutionBatch::new(
        LevelContext::new(EducationLevel::Inicial, "5 años", "Ciencia"),
        vec![
            image("Sol", "el sol brillante"),
            ResourceRequest::new(
                "",
                "Video de animales",
                LessonMoment::Opening,
                ResourceKind::SearchedVideo {
                    query: "animales de la granja".to_string(),
                },
            ),
            image("Luna", "la luna y las estrellas"),
            image("Árbol", "un árbol con frutas"),
            ResourceRequest::new(
                "",
                "Partes de la planta",
                LessonMoment::Closing,
                ResourceKind::GeneratedDiagram {
                    description: "raíz, tallo, hojas, flor".to_string(),
                    diagram_type: aula_orchestrator::DiagramType::Mindmap,
                },
            ),
            image("Mariposa", "una mariposa"),
            image("Flor", "una flor"),
        ],
    );
    batch.assign_missing_ids();
    batch
}

fn temp_batch_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("aula-it-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    let path = dir.join("batch.json");
    std::fs::write(&path, contents).expect("Failed to write batch");
    path
}

// ============================================================================
// Batch loading
// ============================================================================

#[test]
fn test_batch_file_loads_and_assigns_ids() {
    let path = temp_batch_file(
        "load",
        r#"{
            "context": { "level": "SECUNDARIA", "grade": "2do", "subjectArea": "Historia" },
            "resources": [
                { "title": "Línea de tiempo", "lessonMoment": "development",
                  "type": "generated_diagram", "description": "independencias", "diagramType": "timeline" },
                { "title": "Mapa antiguo", "lessonMoment": "opening",
                  "type": "searched_image", "query": "mapa virreinato",
                  "source": { "resolvedUrl": "https://example.org/mapa.jpg", "attribution": "Archivo" } }
            ]
        }"#,
    );

    let mut batch = ResolutionBatch::load(&path).expect("Batch should load");
    assert_eq!(batch.context.level, EducationLevel::Secundaria);
    assert_eq!(batch.assign_missing_ids(), 2);
    assert_eq!(batch.resources[0].id, "generated_diagram-development-linea-de-tiempo");
    assert_eq!(batch.resources[1].id, "searched_image-opening-mapa-antiguo");
    batch.validate().expect("Batch should be valid");
}

#[test]
fn test_missing_batch_file_is_reported() {
    let err = ResolutionBatch::load(std::path::Path::new("/no/such/aula/batch.json"))
        .expect_err("Missing file must fail");
    assert!(err.to_string().contains("batch.json"));
}

#[test]
fn test_config_defaults_without_file() {
    let dir = std::env::temp_dir().join(format!("aula-it-{}-noconfig", std::process::id()));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    let config = Config::load_from_dir(&dir).expect("Defaults should load");
    assert_eq!(config.resolver.max_concurrent_generations, 2);
    assert_eq!(config.backend.api_key_env, "GEMINI_API_KEY");
}

// ============================================================================
// Direct mode
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_direct_mode_windows_images_and_keeps_order() {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(100)));
    let resolver = Resolver::new(backend.clone(), RetryPolicy::none(), GenerationWindow::new(2));
    let batch = mixed_batch();

    let resolved = resolver
        .resolve_all(&batch.resources, &batch.context)
        .await
        .expect("Batch should resolve");

    let ids: Vec<&str> = resolved.iter().map(ResolvedResource::id).collect();
    let expected: Vec<&str> = batch.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, expected);

    assert!(resolved.iter().all(|r| r.status == ResourceStatus::Ready));
    assert_eq!(backend.call_count(BackendOp::Image), 5);
    assert!(backend.max_concurrent_images() <= 2);

    // Every image prompt carries the youngest-audience style
    for call in backend.calls().iter().filter(|c| c.op == BackendOp::Image) {
        assert!(call.prompt.contains("playful cartoon illustration"), "{}", call.prompt);
    }
}

#[tokio::test]
async fn test_direct_mode_reuses_resolved_url() {
    let backend = Arc::new(FakeBackend::new());
    let resolver = Resolver::new(backend.clone(), RetryPolicy::none(), GenerationWindow::new(2));
    let request = image("Volcán", "un volcán").with_source(aula_orchestrator::ResourceSource {
        resolved_url: Some("https://cdn.example.org/volcan.png".to_string()),
        thumbnail_url: None,
        attribution: None,
    });
    let mut batch = ResolutionBatch::new(LevelContext::default(), vec![request]);
    batch.assign_missing_ids();

    let resolved = resolver
        .resolve_all(&batch.resources, &batch.context)
        .await
        .expect("Batch should resolve");
    assert_eq!(resolved[0].url(), Some("https://cdn.example.org/volcan.png"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_direct_mode_isolates_image_failure() {
    let backend = Arc::new(
        FakeBackend::new().fail_prompts_containing("moon", BackendError::api(400, "blocked")),
    );
    let resolver = Resolver::new(backend, RetryPolicy::none(), GenerationWindow::new(2));
    let batch = mixed_batch();

    let resolved = resolver
        .resolve_all(&batch.resources, &batch.context)
        .await
        .expect("Batch should resolve");

    let failed: Vec<&ResolvedResource> = resolved
        .iter()
        .filter(|r| r.status == ResourceStatus::Error)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].request.title, "Luna");
    assert!(failed[0].thumbnail_url.is_some());
    assert_eq!(resolved.len(), 7);
}

// ============================================================================
// Progressive mode
// ============================================================================

#[tokio::test]
async fn test_progressive_mode_through_channel() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = Orchestrator::new(backend, RetryPolicy::none());
    let batch = mixed_batch();

    let (tx, mut rx) = mpsc::unbounded_channel::<ResourceUpdate>();
    let outcome = orchestrator
        .process_all(&batch.resources, &batch.context, &tx)
        .await
        .expect("Batch should process");
    drop(tx);

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }

    assert_eq!(outcome.ready, 7);
    assert_eq!(updates.len(), 14);
    assert!(updates[..7]
        .iter()
        .all(|u| u.status() == ResourceStatus::Loading));

    let diagram = outcome
        .resources
        .iter()
        .find(|r| r.request.title == "Partes de la planta")
        .expect("Diagram present");
    assert!(matches!(diagram.artifact, Some(Artifact::Diagram { .. })));
}

#[tokio::test]
async fn test_board_matches_outcome() {
    let backend = Arc::new(
        FakeBackend::new().fail_always(BackendOp::Content, BackendError::api(503, "busy")),
    );
    let orchestrator = Orchestrator::new(backend, RetryPolicy::none());
    let batch = mixed_batch();

    let board = Arc::new(ResourceBoard::new());
    board.track(&batch);
    assert_eq!(board.count(ResourceStatus::Pending), 7);

    let outcome = orchestrator
        .process_all(&batch.resources, &batch.context, &board)
        .await
        .expect("Batch should process");

    assert_eq!(outcome.failed, 1);
    assert_eq!(board.count(ResourceStatus::Error), 1);
    assert_eq!(board.count(ResourceStatus::Ready), 6);
    assert_eq!(board.snapshot(), outcome.resources);
}

#[tokio::test]
async fn test_both_modes_reject_duplicate_titles() {
    let backend = Arc::new(FakeBackend::new());
    let mut batch = mixed_batch();
    batch.resources[1].title = batch.resources[0].title.clone();

    let resolver = Resolver::new(backend.clone(), RetryPolicy::none(), GenerationWindow::default());
    let err = resolver
        .resolve_all(&batch.resources, &batch.context)
        .await
        .expect_err("Duplicate titles must fail");
    assert!(err.is_batch_invalid());

    let orchestrator = Orchestrator::new(backend.clone(), RetryPolicy::none());
    let err = orchestrator
        .process_all(&batch.resources, &batch.context, &|_: ResourceUpdate| {})
        .await
        .expect_err("Duplicate titles must fail");
    assert!(err.is_batch_invalid());
    assert!(backend.calls().is_empty());
}
