//! # Delphic Core
//!
//! Shared, I/O-free logic for Delphic: collection and document models,
//! websocket path extraction, the query-socket wire format, the error
//! taxonomy, and the collection store abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP client
//! dependencies. The service crate (`delphic`) provides the SQLite store,
//! the orchestrator client, the indexing job runner, and the server.

pub mod error;
pub mod format;
pub mod models;
pub mod paths;
pub mod store;
