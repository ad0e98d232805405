//! Query-socket sessions.
//!
//! A session is the per-connection state behind one websocket: the
//! identifier taken from the socket path and the chat engine resolved for
//! it. The transport ([`server`](crate::server)) owns the socket and feeds
//! frames through [`QuerySession::handle_text`] one at a time; this
//! module never touches the socket itself.
//!
//! Connect flow:
//!
//! ```text
//! path ──extract──▶ id ──EngineFactory::resolve──▶ engine ──▶ Open
//!   │                          │
//!   └─ InvalidPathError        ├─ NotFound / NotReady ──▶ Reject(4000)
//!      ──▶ Reject(4000)        └─ Backend ─────────────▶ Fatal(1011)
//! ```

use delphic_core::error::{EngineResolutionError, InvalidPathError};
use delphic_core::format::{
    format_markdown, parse_client_message, ServerMessage, NO_ENGINE_MESSAGE,
};
use delphic_core::paths;

use crate::traits::{ChatEngine, EngineFactory};

/// Close code sent when the identifier could not be resolved.
pub const CLOSE_UNRESOLVED: u16 = 4000;
/// Close code sent when engine construction failed.
pub const CLOSE_SERVER_ERROR: u16 = 1011;

const UNRESOLVED_REASON: &str = "identifier could not be resolved";
const SERVER_ERROR_REASON: &str = "server error";

/// Close-frame reasons share a 125-byte control frame with the 2-byte code.
const MAX_CLOSE_REASON_BYTES: usize = 123;

fn close_reason(reason: &str) -> String {
    let mut end = reason.len().min(MAX_CLOSE_REASON_BYTES);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

/// Which engine family a socket path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVariant {
    /// `/ws/collections/{id}/query`: vector + keyword-graph engine over a
    /// collection's artifacts.
    Hybrid,
    /// `/ws/collections/{graph_id}/kgquery`: knowledge-graph engine over a
    /// graph space.
    Graph,
}

impl QueryVariant {
    /// Pick the variant for a socket path. Anything not ending in
    /// `/kgquery` goes through the hybrid protocol.
    pub fn for_path(path: &str) -> Self {
        if path.trim_end_matches('/').ends_with("/kgquery") {
            QueryVariant::Graph
        } else {
            QueryVariant::Hybrid
        }
    }

    pub fn extract(&self, path: &str) -> Result<String, InvalidPathError> {
        match self {
            QueryVariant::Hybrid => paths::extract_connection_id(path),
            QueryVariant::Graph => paths::extract_graph_id(path),
        }
    }
}

/// Result of trying to open a session.
pub enum ConnectOutcome {
    Open(QuerySession),
    /// Accept the socket, then close it with `code`.
    Reject { code: u16, reason: String },
    /// Engine construction failed for a reason other than the identifier.
    Fatal(EngineResolutionError),
}

impl ConnectOutcome {
    /// Close code and reason for non-open outcomes.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        match self {
            ConnectOutcome::Open(_) => None,
            ConnectOutcome::Reject { code, reason } => Some((*code, close_reason(reason))),
            ConnectOutcome::Fatal(_) => {
                Some((CLOSE_SERVER_ERROR, SERVER_ERROR_REASON.to_string()))
            }
        }
    }
}

/// Resolve a socket path into a session.
pub async fn connect(
    path: &str,
    variant: QueryVariant,
    factory: &dyn EngineFactory,
) -> ConnectOutcome {
    let id = match variant.extract(path) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(path, error = %e, "rejecting query socket");
            return ConnectOutcome::Reject {
                code: CLOSE_UNRESOLVED,
                reason: UNRESOLVED_REASON.to_string(),
            };
        }
    };

    match factory.resolve(&id).await {
        Ok(engine) => {
            tracing::info!(path, id = %id, factory = factory.name(), "query session opened");
            ConnectOutcome::Open(QuerySession::new(id, engine))
        }
        Err(e) if e.is_unresolved() => {
            tracing::warn!(path, id = %id, error = %e, "identifier could not be resolved");
            ConnectOutcome::Reject {
                code: CLOSE_UNRESOLVED,
                reason: UNRESOLVED_REASON.to_string(),
            }
        }
        Err(e) => {
            tracing::error!(path, id = %id, error = %e, "engine construction failed");
            ConnectOutcome::Fatal(e)
        }
    }
}

/// One open query socket.
pub struct QuerySession {
    id: String,
    engine: Option<Box<dyn ChatEngine>>,
}

impl QuerySession {
    pub fn new(id: String, engine: Box<dyn ChatEngine>) -> Self {
        Self {
            id,
            engine: Some(engine),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_bound(&self) -> bool {
        self.engine.is_some()
    }

    /// Answer one inbound text frame. Errors are reported in the reply; the
    /// session always stays usable.
    pub async fn handle_text(&self, text: &str) -> ServerMessage {
        let message = match parse_client_message(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "malformed query message");
                return ServerMessage::Error(e.to_string());
            }
        };

        let Some(engine) = &self.engine else {
            return ServerMessage::Error(NO_ENGINE_MESSAGE.to_string());
        };

        match engine.chat(&message.query).await {
            Ok(response) => ServerMessage::Response(format_markdown(&response)),
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "chat failed");
                ServerMessage::Error(format!("{:#}", e))
            }
        }
    }

    /// Answer one inbound binary frame. The payload must be UTF-8 JSON, the
    /// same as a text frame.
    pub async fn handle_binary(&self, payload: &[u8]) -> ServerMessage {
        match std::str::from_utf8(payload) {
            Ok(text) => self.handle_text(text).await,
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "binary frame is not UTF-8");
                ServerMessage::Error(format!("binary frame is not valid UTF-8: {}", e))
            }
        }
    }

    /// Drop the bound engine, letting it free remote state.
    pub async fn release(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close().await {
                tracing::warn!(id = %self.id, error = %e, "failed to release engine");
            }
            tracing::info!(id = %self.id, "query session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use delphic_core::models::{ChatResponse, Citation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        chats: AtomicUsize,
        closes: AtomicUsize,
    }

    struct ScriptedEngine {
        sources: Vec<Citation>,
        fail: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl ChatEngine for ScriptedEngine {
        async fn chat(&self, query: &str) -> Result<ChatResponse> {
            self.counters.chats.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("llm unavailable");
            }
            Ok(ChatResponse {
                text: format!("answer to {}", query),
                sources: self.sources.clone(),
            })
        }

        async fn close(&self) -> Result<()> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    enum Behaviour {
        Resolve { sources: Vec<Citation>, fail: bool },
        NotFound,
        Backend,
    }

    struct StubFactory {
        behaviour: Behaviour,
        counters: Arc<Counters>,
        resolved: std::sync::Mutex<Vec<String>>,
    }

    impl StubFactory {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                counters: Arc::default(),
                resolved: Default::default(),
            }
        }

        fn answering() -> Self {
            Self::new(Behaviour::Resolve {
                sources: vec![],
                fail: false,
            })
        }
    }

    #[async_trait]
    impl EngineFactory for StubFactory {
        fn name(&self) -> &str {
            "stub"
        }

        async fn resolve(&self, id: &str) -> Result<Box<dyn ChatEngine>, EngineResolutionError> {
            self.resolved.lock().unwrap().push(id.to_string());
            match &self.behaviour {
                Behaviour::Resolve { sources, fail } => Ok(Box::new(ScriptedEngine {
                    sources: sources.clone(),
                    fail: *fail,
                    counters: self.counters.clone(),
                })),
                Behaviour::NotFound => Err(EngineResolutionError::NotFound(id.to_string())),
                Behaviour::Backend => Err(EngineResolutionError::Backend("boom".into())),
            }
        }
    }

    async fn open(factory: &StubFactory, path: &str) -> QuerySession {
        match connect(path, QueryVariant::for_path(path), factory).await {
            ConnectOutcome::Open(session) => session,
            _ => panic!("expected session to open for {}", path),
        }
    }

    #[test]
    fn test_variant_for_path() {
        assert_eq!(
            QueryVariant::for_path("/ws/collections/42/query"),
            QueryVariant::Hybrid
        );
        assert_eq!(
            QueryVariant::for_path("/ws/collections/space/kgquery"),
            QueryVariant::Graph
        );
        assert_eq!(
            QueryVariant::for_path("/ws/collections/abc/other"),
            QueryVariant::Hybrid
        );
    }

    #[tokio::test]
    async fn test_connect_binds_extracted_id() {
        let factory = StubFactory::answering();
        let session = open(&factory, "/ws/collections/42/query").await;
        assert_eq!(session.id(), "42");
        assert!(session.is_bound());
        assert_eq!(*factory.resolved.lock().unwrap(), vec!["42".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_path_rejects_without_resolving() {
        let factory = StubFactory::answering();
        let outcome = connect(
            "/ws/collections/abc/query",
            QueryVariant::Hybrid,
            &factory,
        )
        .await;
        assert_eq!(
            outcome.close_frame().map(|(code, _)| code),
            Some(CLOSE_UNRESOLVED)
        );
        assert!(factory.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_identifier_rejects_with_4000() {
        let factory = StubFactory::new(Behaviour::NotFound);
        let outcome = connect("/ws/collections/7/query", QueryVariant::Hybrid, &factory).await;
        assert!(matches!(
            outcome,
            ConnectOutcome::Reject {
                code: CLOSE_UNRESOLVED,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal() {
        let factory = StubFactory::new(Behaviour::Backend);
        let outcome = connect("/ws/collections/g1/kgquery", QueryVariant::Graph, &factory).await;
        assert!(matches!(outcome, ConnectOutcome::Fatal(_)));
        assert_eq!(
            outcome.close_frame().map(|(code, _)| code),
            Some(CLOSE_SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn test_query_without_sources() {
        let factory = StubFactory::answering();
        let session = open(&factory, "/ws/collections/42/query").await;
        let reply = session.handle_text(r#"{"query": "hello"}"#).await;
        assert_eq!(
            reply,
            ServerMessage::Response("## Response\n\nanswer to hello\n\n".into())
        );
    }

    #[tokio::test]
    async fn test_query_with_sources() {
        let factory = StubFactory::new(Behaviour::Resolve {
            sources: vec!["s1".into(), "s2".into()],
            fail: false,
        });
        let session = open(&factory, "/ws/collections/my-graph/kgquery").await;
        assert_eq!(session.id(), "my-graph");
        let reply = session.handle_text(r#"{"query": "q"}"#).await;
        assert_eq!(
            reply,
            ServerMessage::Response(
                "## Response\n\nanswer to q\n\n## Sources\n\n- s1\n- s2\n".into()
            )
        );
    }

    #[tokio::test]
    async fn test_malformed_message_stays_open() {
        let factory = StubFactory::answering();
        let session = open(&factory, "/ws/collections/1/query").await;

        for bad in ["not json", r#"{"question": "x"}"#, r#"{"query": 5}"#] {
            assert!(matches!(
                session.handle_text(bad).await,
                ServerMessage::Error(_)
            ));
        }
        assert_eq!(factory.counters.chats.load(Ordering::SeqCst), 0);

        assert!(matches!(
            session.handle_text(r#"{"query": "ok"}"#).await,
            ServerMessage::Response(_)
        ));
    }

    #[tokio::test]
    async fn test_chat_failure_is_reported() {
        let factory = StubFactory::new(Behaviour::Resolve {
            sources: vec![],
            fail: true,
        });
        let session = open(&factory, "/ws/collections/1/query").await;
        let reply = session.handle_text(r#"{"query": "q"}"#).await;
        assert_eq!(reply, ServerMessage::Error("llm unavailable".into()));
    }

    #[tokio::test]
    async fn test_long_identifier_keeps_close_reason_short() {
        let long_id = "x".repeat(150);
        let factory = StubFactory::new(Behaviour::NotFound);

        for path in [
            format!("/ws/collections/{}/query", long_id),
            format!("/ws/collections/{}/kgquery", long_id),
        ] {
            let outcome = connect(&path, QueryVariant::for_path(&path), &factory).await;
            let (code, reason) = outcome.close_frame().unwrap();
            assert_eq!(code, CLOSE_UNRESOLVED);
            assert!(reason.len() <= MAX_CLOSE_REASON_BYTES);
            assert!(!reason.contains(&long_id));
        }
    }

    #[test]
    fn test_close_reason_truncates_on_char_boundary() {
        let reason = "é".repeat(100);
        let cut = close_reason(&reason);
        assert!(cut.len() <= MAX_CLOSE_REASON_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(close_reason("short"), "short");
    }

    #[tokio::test]
    async fn test_binary_frames_are_answered() {
        let factory = StubFactory::answering();
        let session = open(&factory, "/ws/collections/42/query").await;

        let reply = session.handle_binary(br#"{"query": "hi"}"#).await;
        assert_eq!(
            reply,
            ServerMessage::Response("## Response\n\nanswer to hi\n\n".into())
        );

        let reply = session.handle_binary(&[0xff, 0xfe]).await;
        assert!(matches!(reply, ServerMessage::Error(msg) if msg.contains("UTF-8")));
    }

    #[tokio::test]
    async fn test_release_closes_engine_once_then_unbound() {
        let factory = StubFactory::answering();
        let mut session = open(&factory, "/ws/collections/1/query").await;

        session.release().await;
        session.release().await;
        assert_eq!(factory.counters.closes.load(Ordering::SeqCst), 1);
        assert!(!session.is_bound());

        assert_eq!(
            session.handle_text(r#"{"query": "q"}"#).await,
            ServerMessage::Error(NO_ENGINE_MESSAGE.into())
        );
    }
}
