//! Integration tests for progressive WebSocket updates.
//!
//! A real server is bound on a free port, batches are submitted over HTTP
//! with `reqwest`, and clients observe the stream with `tokio-tungstenite`.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use aula_backend::testing::FakeBackend;
use aula_backend::BackendError;
use aula_orchestrator::{create_router, AppState, Config, ResourceEvent, ResourceStatus};
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn app_state(backend: FakeBackend) -> AppState {
    let mut config = Config::default();
    config.retry.max_attempts = 1;
    AppState::new(config, Arc::new(backend))
}

/// Spawns the test server and returns its base HTTP and WebSocket URLs.
async fn spawn_test_server(state: AppState) -> (String, String) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), format!("ws://{addr}/ws"))
}

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> ResourceEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects events until `batch_complete`, returning them all.
async fn receive_until_complete(client: &mut WsClient) -> Vec<ResourceEvent> {
    let mut events = Vec::new();
    loop {
        let event = receive_event(client).await;
        let done = matches!(event, ResourceEvent::BatchComplete(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

fn lesson_batch() -> serde_json::Value {
    serde_json::json!({
        "context": { "level": "Primaria", "grade": "3ro", "subjectArea": "Ciencias Naturales" },
        "resources": [
            {
                "id": "generated_image-opening-ciclo",
                "title": "Ciclo del agua",
                "lessonMoment": "opening",
                "type": "generated_image",
                "prompt": "el ciclo del agua con sol y nubes"
            },
            {
                "id": "generated_diagram-development-etapas",
                "title": "Etapas del ciclo",
                "lessonMoment": "development",
                "type": "generated_diagram",
                "description": "evaporación, condensación, precipitación",
                "diagramType": "CYCLE"
            },
            {
                "id": "searched_video-development-video",
                "title": "Video del ciclo del agua",
                "lessonMoment": "development",
                "type": "searched_video",
                "query": "ciclo del agua para niños"
            }
        ]
    })
}

async fn submit(http_url: &str, body: &serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{http_url}/api/batches"))
        .json(body)
        .send()
        .await
        .expect("Failed to send HTTP request")
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_client_receives_empty_board_on_connect() {
    let (_, ws_url) = spawn_test_server(app_state(FakeBackend::new())).await;

    let mut client = connect_client(&ws_url).await;
    match receive_event(&mut client).await {
        ResourceEvent::Connected(payload) => {
            assert!(payload.context.is_none());
            assert!(payload.resources.is_empty());
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

// ============================================================================
// Progressive Update Tests
// ============================================================================

#[tokio::test]
async fn test_batch_streams_loading_then_terminal_updates() {
    let backend = FakeBackend::new().with_latency(Duration::from_millis(20));
    let (http_url, ws_url) = spawn_test_server(app_state(backend)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await; // Consume connected event

    let response = submit(&http_url, &lesson_batch()).await;
    assert_eq!(response.status().as_u16(), 202);

    let events = receive_until_complete(&mut client).await;
    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ResourceEvent::Resource(u) => Some(u),
            _ => None,
        })
        .collect();

    // One loading and one terminal update per resource, loading first
    assert_eq!(updates.len(), 6);
    assert!(updates[..3]
        .iter()
        .all(|u| u.status() == ResourceStatus::Loading));
    assert!(updates[3..]
        .iter()
        .all(|u| u.status() == ResourceStatus::Ready));

    match events.last() {
        Some(ResourceEvent::BatchComplete(payload)) => {
            assert_eq!(payload.ready, 3);
            assert_eq!(payload.failed, 0);
        }
        other => panic!("Expected BatchComplete event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_resource_does_not_block_siblings() {
    let backend = FakeBackend::new().fail_prompts_containing(
        "water cycle",
        BackendError::api(500, "image model unavailable"),
    );
    let (http_url, ws_url) = spawn_test_server(app_state(backend)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    submit(&http_url, &lesson_batch()).await;
    let events = receive_until_complete(&mut client).await;

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ResourceEvent::Resource(u) if u.status() == ResourceStatus::Error => Some(u),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "generated_image-opening-ciclo");
    assert!(failed[0]
        .resource
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("image model unavailable"));

    match events.last() {
        Some(ResourceEvent::BatchComplete(payload)) => {
            assert_eq!(payload.ready, 2);
            assert_eq!(payload.failed, 1);
        }
        other => panic!("Expected BatchComplete event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_batch_rejected_without_events() {
    let (http_url, ws_url) = spawn_test_server(app_state(FakeBackend::new())).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let mut body = lesson_batch();
    body["resources"][2]["id"] = serde_json::json!("generated_image-opening-ciclo");
    let response = submit(&http_url, &body).await;
    assert_eq!(response.status().as_u16(), 422);

    let error: serde_json::Value = response.json().await.expect("Invalid error body");
    assert!(error["error"]
        .as_str()
        .unwrap_or_default()
        .contains("generated_image-opening-ciclo"));

    // Nothing was broadcast
    let next = timeout(Duration::from_millis(200), client.next()).await;
    assert!(next.is_err(), "Unexpected message: {next:?}");
}

#[tokio::test]
async fn test_late_joiner_sees_settled_board() {
    let (http_url, ws_url) = spawn_test_server(app_state(FakeBackend::new())).await;

    let mut first = connect_client(&ws_url).await;
    receive_event(&mut first).await;
    submit(&http_url, &lesson_batch()).await;
    receive_until_complete(&mut first).await;

    let mut late = connect_client(&ws_url).await;
    match receive_event(&mut late).await {
        ResourceEvent::Connected(payload) => {
            let ids: Vec<&str> = payload.resources.iter().map(|r| r.id()).collect();
            assert_eq!(
                ids,
                vec![
                    "generated_image-opening-ciclo",
                    "generated_diagram-development-etapas",
                    "searched_video-development-video",
                ]
            );
            assert!(payload
                .resources
                .iter()
                .all(|r| r.status == ResourceStatus::Ready));
            assert_eq!(
                payload.context.map(|c| c.subject_area),
                Some("Ciencias Naturales".to_string())
            );
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_updates_reach_all_clients() {
    let (http_url, ws_url) = spawn_test_server(app_state(FakeBackend::new())).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;

    submit(&http_url, &lesson_batch()).await;

    let events1 = receive_until_complete(&mut client1).await;
    let events2 = receive_until_complete(&mut client2).await;
    assert_eq!(events1.len(), 7);
    assert_eq!(events2.len(), 7);
}

#[tokio::test]
async fn test_retry_endpoint_streams_new_updates() {
    let (http_url, ws_url) = spawn_test_server(app_state(FakeBackend::new())).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;
    submit(&http_url, &lesson_batch()).await;
    receive_until_complete(&mut client).await;

    let response = reqwest::Client::new()
        .post(format!(
            "{http_url}/api/resources/generated_diagram-development-etapas/retry"
        ))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert_eq!(response.status().as_u16(), 202);

    let mut statuses = Vec::new();
    while statuses.len() < 2 {
        if let ResourceEvent::Resource(update) = receive_event(&mut client).await {
            assert_eq!(update.id, "generated_diagram-development-etapas");
            statuses.push(update.status());
        }
    }
    assert_eq!(statuses, vec![ResourceStatus::Loading, ResourceStatus::Ready]);
}

// ============================================================================
// Disconnection Tests
// ============================================================================

#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let state = app_state(FakeBackend::new());
    let broadcaster = state.broadcaster.clone();
    let (_, ws_url) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    client1.close(None).await.ok();
    drop(client1);

    // Give server time to process disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client2 = connect_client(&ws_url).await;
    assert!(matches!(
        receive_event(&mut client2).await,
        ResourceEvent::Connected(_)
    ));

    broadcaster.send(ResourceEvent::error("backend offline"));
    assert!(matches!(
        receive_event(&mut client2).await,
        ResourceEvent::Error(_)
    ));
}
