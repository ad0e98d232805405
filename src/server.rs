//! HTTP and websocket server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/collections` | Upload documents and queue an indexing job |
//! | `GET`  | `/collections/{id}` | Collection status and document names |
//! | `GET`  | `/ws/collections/{id}/query` | Hybrid query socket |
//! | `GET`  | `/ws/collections/{graph_id}/kgquery` | Knowledge-graph query socket |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "title must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # Query sockets
//!
//! Every upgrade request is accepted. Identifier resolution happens after
//! the handshake; a socket whose path or identifier cannot be resolved is
//! closed with 4000, and one whose engine could not be built with 1011.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use delphic_core::models::{Collection, CollectionStatus, NewCollection, NewDocument};
use delphic_core::store::CollectionStore;

use crate::config::Config;
use crate::db;
use crate::jobs::{IndexingJobRunner, JobQueue};
use crate::migrate;
use crate::orchestrator::{
    GraphEngineFactory, HybridEngineFactory, OrchestratorClient, RemoteGraphIndexBuilder,
    RemoteVectorIndexBuilder,
};
use crate::session::{connect, ConnectOutcome, QuerySession, QueryVariant};
use crate::sqlite_store::SqliteStore;
use crate::traits::{ArtifactLayout, EngineFactory};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CollectionStore>,
    hybrid: Arc<dyn EngineFactory>,
    graph: Arc<dyn EngineFactory>,
    jobs: JobQueue,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        hybrid: Arc<dyn EngineFactory>,
        graph: Arc<dyn EngineFactory>,
        jobs: JobQueue,
    ) -> Self {
        Self {
            store,
            hybrid,
            graph,
            jobs,
        }
    }

    fn factory_for(&self, variant: QueryVariant) -> Arc<dyn EngineFactory> {
        match variant {
            QueryVariant::Hybrid => self.hybrid.clone(),
            QueryVariant::Graph => self.graph.clone(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/collections", post(handle_create_collection))
        .route("/collections/{id}", get(handle_get_collection))
        .route("/ws/collections/{*rest}", get(handle_query_socket))
        .layer(cors)
        .with_state(state)
}

/// Wire the SQLite store, orchestrator client, and job workers from the
/// config into an [`AppState`].
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store: Arc<dyn CollectionStore> = Arc::new(SqliteStore::new(pool));

    let client = Arc::new(OrchestratorClient::from_config(config)?);
    let layout = ArtifactLayout::new(&config.storage.root);

    let runner = IndexingJobRunner::from_config(
        config,
        store.clone(),
        Arc::new(RemoteVectorIndexBuilder::new(client.clone())),
        Arc::new(RemoteGraphIndexBuilder::new(client.clone())),
    );
    let jobs = JobQueue::start(Arc::new(runner), config.jobs.workers);

    Ok(AppState::new(
        store.clone(),
        Arc::new(HybridEngineFactory::new(client.clone(), store, layout)),
        Arc::new(GraphEngineFactory::new(client)),
        jobs,
    ))
}

/// Starts the server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "delphic listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /collections ============

#[derive(Deserialize)]
struct CreateCollectionRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    documents: Vec<UploadedDocument>,
}

#[derive(Deserialize)]
struct UploadedDocument {
    filename: String,
    base64_file_string: String,
}

#[derive(Serialize)]
struct CreateCollectionResponse {
    id: i64,
    status: CollectionStatus,
}

async fn handle_create_collection(
    State(state): State<AppState>,
    payload: Result<Json<CreateCollectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateCollectionResponse>), AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;

    if req.title.trim().is_empty() {
        return Err(bad_request("title must not be empty"));
    }

    let mut documents = Vec::with_capacity(req.documents.len());
    for doc in &req.documents {
        if doc.filename.trim().is_empty() {
            return Err(bad_request("document filename must not be empty"));
        }
        let content = base64::engine::general_purpose::STANDARD
            .decode(doc.base64_file_string.trim())
            .map_err(|e| bad_request(format!("invalid base64 for {}: {}", doc.filename, e)))?;
        documents.push(NewDocument {
            file_name: doc.filename.clone(),
            content,
        });
    }

    let collection = state
        .store
        .create_collection(&NewCollection {
            title: req.title,
            description: req.description,
        })
        .await
        .map_err(internal)?;
    for doc in &documents {
        state
            .store
            .add_document(collection.id, doc)
            .await
            .map_err(internal)?;
    }
    tracing::info!(
        collection_id = collection.id,
        documents = documents.len(),
        "collection created"
    );

    state.jobs.enqueue(collection.id).map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateCollectionResponse {
            id: collection.id,
            status: collection.status,
        }),
    ))
}

// ============ GET /collections/{id} ============

#[derive(Serialize)]
struct CollectionResponse {
    #[serde(flatten)]
    collection: Collection,
    documents: Vec<String>,
}

async fn handle_get_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CollectionResponse>, AppError> {
    let collection = state
        .store
        .get_collection(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("collection {} not found", id)))?;
    let documents = state
        .store
        .list_documents(id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|d| d.file_name)
        .collect();

    Ok(Json(CollectionResponse {
        collection,
        documents,
    }))
}

// ============ GET /ws/collections/... ============

async fn handle_query_socket(
    State(state): State<AppState>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let path = uri.path().to_string();
    let variant = QueryVariant::for_path(&path);
    let factory = state.factory_for(variant);
    ws.on_upgrade(move |socket| drive_socket(socket, path, variant, factory))
}

async fn drive_socket(
    mut socket: WebSocket,
    path: String,
    variant: QueryVariant,
    factory: Arc<dyn EngineFactory>,
) {
    let outcome = connect(&path, variant, factory.as_ref()).await;
    let mut session = match outcome {
        ConnectOutcome::Open(session) => session,
        other => {
            if let Some((code, reason)) = other.close_frame() {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            return;
        }
    };

    serve_session(&mut socket, &session).await;
    session.release().await;
}

/// Answer frames one at a time until the client goes away.
async fn serve_session(socket: &mut WebSocket, session: &QuerySession) {
    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(id = %session.id(), error = %e, "socket error");
                break;
            }
        };
        let reply = match msg {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(payload) => session.handle_binary(&payload).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if socket
            .send(Message::Text(reply.to_json().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
