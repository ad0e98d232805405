//! Core data models shared by the store, the indexing job, and the
//! query sessions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StatusTransitionError;

/// Indexing status of a [`Collection`].
///
/// Transitions: `PENDING → RUNNING → {COMPLETE, ERROR}`. A collection in
/// `ERROR` may be moved back to `RUNNING` for a full rebuild; nothing
/// leaves `COMPLETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Pending => "PENDING",
            CollectionStatus::Running => "RUNNING",
            CollectionStatus::Complete => "COMPLETE",
            CollectionStatus::Error => "ERROR",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: CollectionStatus) -> bool {
        use CollectionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Error, Running) | (Running, Complete) | (Running, Error)
        )
    }

    /// Validate a transition, returning the target status on success.
    pub fn transition(
        &self,
        next: CollectionStatus,
    ) -> Result<CollectionStatus, StatusTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusTransitionError {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CollectionStatus::Pending),
            "RUNNING" => Ok(CollectionStatus::Running),
            "COMPLETE" => Ok(CollectionStatus::Complete),
            "ERROR" => Ok(CollectionStatus::Error),
            other => anyhow::bail!("unknown collection status: '{}'", other),
        }
    }
}

/// A named group of uploaded documents.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: CollectionStatus,
    /// Artifact marker recorded when an index build completes.
    pub model: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a collection. New collections always start `PENDING`.
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub title: String,
    pub description: Option<String>,
}

/// A file blob belonging to exactly one collection.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub collection_id: i64,
    /// Relative path of the file inside the collection.
    pub file_name: String,
    pub content: Vec<u8>,
    pub created_at: i64,
}

/// Input for attaching a document to a collection.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// A source citation attached to a chat answer.
///
/// Deserializes from either a bare string (`"s1"`) or an object with a
/// `source` and optional `excerpt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Citation {
    Plain(String),
    Detailed {
        source: String,
        #[serde(default)]
        excerpt: Option<String>,
    },
}

impl From<&str> for Citation {
    fn from(s: &str) -> Self {
        Citation::Plain(s.to_string())
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Citation::Plain(s) => f.write_str(s),
            Citation::Detailed {
                source,
                excerpt: Some(excerpt),
            } => write!(f, "{}: {}", source, excerpt),
            Citation::Detailed {
                source,
                excerpt: None,
            } => f.write_str(source),
        }
    }
}

/// Answer returned by a chat engine for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
}
