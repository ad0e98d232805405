//! Query-socket wire format.
//!
//! Client → server: `{"query": "<string>"}`.
//! Server → client: `{"response": "<markdown>"}` or `{"error": "<string>"}`.

use serde::{Deserialize, Serialize};

use crate::error::MalformedRequestError;
use crate::models::ChatResponse;

/// Error text sent when a session has no engine bound.
pub const NO_ENGINE_MESSAGE: &str = "No index loaded for this connection.";

/// An inbound query message.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub query: String,
}

/// Parse an inbound text frame.
///
/// The payload must be a JSON object with a string `query` field. Extra
/// fields are ignored.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, MalformedRequestError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value.get("query") {
        Some(serde_json::Value::String(_)) => Ok(serde_json::from_value(value)?),
        _ => Err(MalformedRequestError::MissingField("query")),
    }
}

/// An outbound reply. Serializes to `{"response": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessage {
    Response(String),
    Error(String),
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Serializing a single-key map of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Render a chat answer as markdown.
///
/// Always contains a `## Response` section; a `## Sources` section with one
/// bullet per citation follows only when the answer carries sources.
pub fn format_markdown(response: &ChatResponse) -> String {
    let mut out = format!("## Response\n\n{}\n\n", response.text);
    if !response.sources.is_empty() {
        out.push_str("## Sources\n\n");
        for source in &response.sources {
            out.push_str(&format!("- {}\n", source));
        }
    }
    out
}
