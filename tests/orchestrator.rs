//! End-to-end flow against a mock orchestration service: upload, background
//! indexing through the HTTP builders, then querying through the HTTP
//! engines.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use delphic::config::{LlmSettings, OrchestratorConfig};
use delphic::jobs::{IndexingJobRunner, JobOutcome, JobQueue};
use delphic::orchestrator::{
    GraphEngineFactory, HybridEngineFactory, OrchestratorClient, RemoteGraphIndexBuilder,
    RemoteVectorIndexBuilder,
};
use delphic::server::{router, AppState};
use delphic::traits::ArtifactLayout;
use delphic_core::models::{CollectionStatus, NewCollection, NewDocument};
use delphic_core::store::memory::InMemoryStore;
use delphic_core::store::CollectionStore;

// ============ Mock orchestrator ============

#[derive(Default)]
struct MockState {
    /// Number of leading `/indexes/vector` calls answered with 503.
    vector_failures: usize,
    vector_calls: usize,
    released: Vec<String>,
    llm_models: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

fn files_for(body: &Value) -> Value {
    let paths: Vec<&str> = body["documents"]
        .as_array()
        .map(|docs| docs.iter().filter_map(|d| d["path"].as_str()).collect())
        .unwrap_or_default();
    json!({ "files": { "docstore.json": serde_json::to_string(&paths).unwrap() } })
}

async fn mock_vector_index(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().unwrap();
    s.vector_calls += 1;
    if s.vector_calls <= s.vector_failures {
        return (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response();
    }
    if let Some(model) = body["llm"]["model_name"].as_str() {
        s.llm_models.push(model.to_string());
    }
    Json(files_for(&body)).into_response()
}

async fn mock_graph_index(Json(body): Json<Value>) -> Response {
    if body["graph_space"]["space_name"] != "llamaindex" {
        return (StatusCode::BAD_REQUEST, "unexpected graph space").into_response();
    }
    Json(files_for(&body)).into_response()
}

async fn mock_hybrid_engine(Json(body): Json<Value>) -> Response {
    let vector_dir = body["vector_index_dir"].as_str().unwrap_or_default();
    let docstore = std::path::Path::new(vector_dir).join("docstore.json");
    if !docstore.is_file() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({ "engine_id": "hybrid-1" })).into_response()
}

async fn mock_graph_engine(Json(body): Json<Value>) -> Response {
    match body["space_name"].as_str() {
        Some("missing") => StatusCode::NOT_FOUND.into_response(),
        Some("escaping") => Json(json!({ "engine_id": "../admin" })).into_response(),
        Some(name) => Json(json!({ "engine_id": format!("graph-{}", name) })).into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn mock_chat(Path(engine_id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    let message = body["message"].as_str().unwrap_or_default();
    Json(json!({
        "text": format!("{} says: {}", engine_id, message),
        "sources": ["a.txt", {"source": "docs/b.md", "excerpt": "beta"}]
    }))
}

async fn mock_release(State(state): State<Shared>, Path(engine_id): Path<String>) -> StatusCode {
    state.lock().unwrap().released.push(engine_id);
    StatusCode::NO_CONTENT
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_mock(state: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/indexes/vector", post(mock_vector_index))
        .route("/indexes/graph", post(mock_graph_index))
        .route("/engines/hybrid", post(mock_hybrid_engine))
        .route("/engines/graph", post(mock_graph_engine))
        .route("/engines/{id}/chat", post(mock_chat))
        .route("/engines/{id}", delete(mock_release))
        .with_state(state);
    spawn(app).await
}

// ============ Delphic under test ============

struct Harness {
    mock: Shared,
    store: Arc<dyn CollectionStore>,
    runner: Arc<IndexingJobRunner>,
    client: Arc<OrchestratorClient>,
    storage: tempfile::TempDir,
}

impl Harness {
    async fn start(vector_failures: usize, max_retries: u32) -> Self {
        let mock: Shared = Arc::new(Mutex::new(MockState {
            vector_failures,
            ..Default::default()
        }));
        let addr = spawn_mock(mock.clone()).await;

        let client = Arc::new(
            OrchestratorClient::new(
                &OrchestratorConfig {
                    base_url: format!("http://{}", addr),
                    timeout_secs: 5,
                    max_retries,
                },
                Arc::new(LlmSettings {
                    model_name: "gpt-3.5-turbo".into(),
                    max_tokens: 512,
                    temperature: 0.0,
                    chunk_size: 512,
                }),
            )
            .unwrap(),
        );

        let storage = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn CollectionStore> = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            IndexingJobRunner::new(
                store.clone(),
                Arc::new(RemoteVectorIndexBuilder::new(client.clone())),
                Arc::new(RemoteGraphIndexBuilder::new(client.clone())),
                ArtifactLayout::new(storage.path().join("artifacts")),
            )
            .with_scratch_root(storage.path().join("scratch")),
        );

        Self {
            mock,
            store,
            runner,
            client,
            storage,
        }
    }

    async fn serve(&self) -> SocketAddr {
        let jobs = JobQueue::start(self.runner.clone(), 1);
        let state = AppState::new(
            self.store.clone(),
            Arc::new(HybridEngineFactory::new(
                self.client.clone(),
                self.store.clone(),
                self.runner.layout().clone(),
            )),
            Arc::new(GraphEngineFactory::new(self.client.clone())),
            jobs,
        );
        spawn(router(state)).await
    }

    async fn collection(&self, files: &[(&str, &str)]) -> i64 {
        let collection = self
            .store
            .create_collection(&NewCollection {
                title: "fixture".into(),
                description: None,
            })
            .await
            .unwrap();
        for (name, body) in files {
            self.store
                .add_document(
                    collection.id,
                    &NewDocument {
                        file_name: name.to_string(),
                        content: body.as_bytes().to_vec(),
                    },
                )
                .await
                .unwrap();
        }
        collection.id
    }
}

async fn first_text(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_runner_persists_orchestrator_artifacts() {
    let h = Harness::start(0, 0).await;
    let id = h.collection(&[("a.txt", "alpha"), ("docs/b.md", "beta")]).await;

    assert_eq!(h.runner.run(id).await, JobOutcome::Completed);

    let artifacts = h.storage.path().join("artifacts").join(id.to_string());
    let vector = std::fs::read_to_string(artifacts.join("vectorindex/docstore.json")).unwrap();
    let graph = std::fs::read_to_string(artifacts.join("graphindex/docstore.json")).unwrap();
    assert_eq!(vector, r#"["a.txt","docs/b.md"]"#);
    assert_eq!(graph, vector);
    assert_eq!(h.mock.lock().unwrap().llm_models, vec!["gpt-3.5-turbo"]);
}

#[tokio::test]
async fn test_runner_retries_server_errors() {
    let h = Harness::start(1, 1).await;
    let id = h.collection(&[("a.txt", "alpha")]).await;

    assert!(h.runner.run(id).await.is_success());
    assert_eq!(h.mock.lock().unwrap().vector_calls, 2);
}

#[tokio::test]
async fn test_runner_marks_error_when_retries_exhausted() {
    let h = Harness::start(5, 0).await;
    let id = h.collection(&[("a.txt", "alpha")]).await;

    assert_eq!(h.runner.run(id).await, JobOutcome::Failed);
    let collection = h.store.get_collection(id).await.unwrap().unwrap();
    assert_eq!(collection.status, CollectionStatus::Error);
}

#[tokio::test]
async fn test_upload_index_and_query_end_to_end() {
    let h = Harness::start(0, 0).await;
    let addr = h.serve().await;
    let http = reqwest::Client::new();

    let created: Value = http
        .post(format!("http://{}/collections", addr))
        .json(&json!({
            "title": "Handbook",
            "documents": [{"filename": "a.txt", "base64_file_string": "YWxwaGE="}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let mut status = Value::Null;
    for _ in 0..200 {
        let body: Value = http
            .get(format!("http://{}/collections/{}", addr, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = body["status"].clone();
        if status == "COMPLETE" || status == "ERROR" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "COMPLETE");

    let url = format!("ws://{}/ws/collections/{}/query", addr, id);
    let (mut socket, _) = connect_async(url).await.unwrap();
    socket
        .send(Message::Text(r#"{"query": "hello"}"#.to_string()))
        .await
        .unwrap();
    let reply = first_text(&mut socket).await;
    assert_eq!(
        reply["response"],
        "## Response\n\nhybrid-1 says: hello\n\n## Sources\n\n- a.txt\n- docs/b.md: beta\n"
    );

    socket.close(None).await.unwrap();
    let mut released = Vec::new();
    for _ in 0..100 {
        released = h.mock.lock().unwrap().released.clone();
        if !released.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(released, vec!["hybrid-1".to_string()]);
}

#[tokio::test]
async fn test_query_before_indexing_is_rejected() {
    let h = Harness::start(0, 0).await;
    let id = h.collection(&[("a.txt", "alpha")]).await;
    let addr = h.serve().await;

    let url = format!("ws://{}/ws/collections/{}/query", addr, id);
    let (mut socket, _) = connect_async(url).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 4000),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_graph_query_and_missing_space() {
    let h = Harness::start(0, 0).await;
    let addr = h.serve().await;

    let url = format!("ws://{}/ws/collections/papers/kgquery", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    socket
        .send(Message::Text(r#"{"query": "who?"}"#.to_string()))
        .await
        .unwrap();
    let reply = first_text(&mut socket).await;
    assert!(reply["response"]
        .as_str()
        .unwrap()
        .starts_with("## Response\n\ngraph-papers says: who?\n\n"));

    let url = format!("ws://{}/ws/collections/missing/kgquery", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 4000),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unusable_engine_id_closes_with_1011() {
    let h = Harness::start(0, 0).await;
    let addr = h.serve().await;

    let url = format!("ws://{}/ws/collections/escaping/kgquery", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1011),
        other => panic!("expected close frame, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.mock.lock().unwrap().released.is_empty());
}
