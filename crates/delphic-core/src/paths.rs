//! Identifier extraction from websocket connection paths.
//!
//! | Function | Pattern | Returns |
//! |----------|---------|---------|
//! | [`extract_connection_id`] | `/ws/collections/{digits}/query` | collection id |
//! | [`extract_graph_id`] | `/ws/collections/{segment}/kgquery` | graph space name |
//!
//! The leading slash and a single trailing slash are optional. Both
//! functions are total: they return a non-empty identifier or an
//! [`InvalidPathError`].

use regex::Regex;
use std::sync::LazyLock;

use crate::error::InvalidPathError;

static CONNECTION_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?ws/collections/(?P<connection_id>\d+)/query/?$").expect("valid regex")
});

static GRAPH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?ws/collections/(?P<graph_id>.+)/kgquery/?$").expect("valid regex")
});

/// Extract the numeric collection id from a hybrid query path.
///
/// ```rust
/// use delphic_core::paths::extract_connection_id;
///
/// assert_eq!(extract_connection_id("/ws/collections/42/query").unwrap(), "42");
/// assert!(extract_connection_id("/ws/collections/abc/query").is_err());
/// ```
pub fn extract_connection_id(path: &str) -> Result<String, InvalidPathError> {
    capture(&CONNECTION_PATH, "connection_id", path)
}

/// Extract the graph id from a graph-only query path.
///
/// The segment may contain any characters, including `/`.
pub fn extract_graph_id(path: &str) -> Result<String, InvalidPathError> {
    capture(&GRAPH_PATH, "graph_id", path)
}

fn capture(pattern: &Regex, group: &str, path: &str) -> Result<String, InvalidPathError> {
    pattern
        .captures(path)
        .and_then(|caps| caps.name(group))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| InvalidPathError {
            path: path.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_with_and_without_leading_slash() {
        assert_eq!(extract_connection_id("/ws/collections/42/query").unwrap(), "42");
        assert_eq!(extract_connection_id("ws/collections/7/query").unwrap(), "7");
        assert_eq!(extract_connection_id("/ws/collections/42/query/").unwrap(), "42");
    }

    #[test]
    fn test_connection_id_returns_exact_digit_group() {
        for id in ["0", "1", "42", "000123", "9876543210"] {
            let path = format!("/ws/collections/{}/query", id);
            assert_eq!(extract_connection_id(&path).unwrap(), id);
        }
    }

    #[test]
    fn test_connection_id_rejects_mismatches() {
        for path in [
            "",
            "/",
            "/ws/collections/abc/query",
            "/ws/collections/12a/query",
            "/ws/collections//query",
            "/ws/collections/42/kgquery",
            "/ws/collections/42/queries",
            "/ws/collections/42",
            "/api/collections/42/query",
            "//ws/collections/42/query",
            "/ws/collections/42/query/extra",
        ] {
            let err = extract_connection_id(path).unwrap_err();
            assert_eq!(err.path, path);
        }
    }

    #[test]
    fn test_graph_id_extracts_segment() {
        assert_eq!(extract_graph_id("/ws/collections/llamaindex/kgquery").unwrap(), "llamaindex");
        assert_eq!(extract_graph_id("ws/collections/42/kgquery").unwrap(), "42");
        assert_eq!(extract_graph_id("/ws/collections/a/b/kgquery").unwrap(), "a/b");
        assert_eq!(extract_graph_id("/ws/collections/space_1/kgquery/").unwrap(), "space_1");
    }

    #[test]
    fn test_graph_id_rejects_mismatches() {
        for path in [
            "/ws/collections//kgquery",
            "/ws/collections/kgquery",
            "/ws/collections/space/query",
            "/ws/collections/space/kgquery/more",
            "/ws/space/kgquery",
        ] {
            assert!(extract_graph_id(path).is_err(), "expected failure for {}", path);
        }
    }
}
