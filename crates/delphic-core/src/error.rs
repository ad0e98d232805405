//! Error taxonomy for query sessions and indexing jobs.
//!
//! | Error | Raised by | Surfaced as |
//! |-------|-----------|-------------|
//! | [`InvalidPathError`] | path extraction | socket accepted then closed with 4000 |
//! | [`MalformedRequestError`] | inbound message parsing | `{"error": ...}`, session stays open |
//! | [`EngineResolutionError`] | engine factories | close 4000 (not found) or 1011 (backend) |
//! | [`IndexBuildError`] | indexing job steps | collection status `ERROR` |
//! | [`StatusTransitionError`] | collection stores | job aborts before building |

use thiserror::Error;

use crate::models::CollectionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path format: {path}")]
pub struct InvalidPathError {
    pub path: String,
}

#[derive(Debug, Error)]
pub enum MalformedRequestError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum EngineResolutionError {
    #[error("no index found for '{0}'")]
    NotFound(String),

    #[error("index for '{id}' is not ready (status {status})")]
    NotReady { id: String, status: CollectionStatus },

    #[error("engine backend error: {0}")]
    Backend(String),
}

impl EngineResolutionError {
    /// Whether the identifier itself could not be resolved, as opposed to
    /// the backend failing while constructing the engine.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            EngineResolutionError::NotFound(_) | EngineResolutionError::NotReady { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("document path escapes the scratch directory: {0}")]
    UnsafePath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} builder failed: {message}")]
    Builder {
        stage: &'static str,
        message: String,
    },

    #[error("indexing exceeded the soft time limit of {0}s")]
    TimedOut(u64),

    #[error("indexing task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal collection status transition {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: CollectionStatus,
    pub to: CollectionStatus,
}
