//! # Delphic
//!
//! Document collections you can talk to.
//!
//! Delphic accepts uploaded documents, builds a vector index and a
//! knowledge-graph index for each collection in the background, and serves
//! conversational query sessions over websockets. Embedding, retrieval, and
//! prompting are delegated to an external LLM orchestration service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ HTTP upload │──▶│   SQLite    │──▶│  JobQueue        │
//! │ / CLI       │   │ collections │   │  IndexingJob     │
//! └─────────────┘   └──────┬──────┘   └────────┬─────────┘
//!                          │ COMPLETE          │ build / persist
//!                          ▼                   ▼
//!                   ┌─────────────┐    ┌──────────────────┐
//!                   │ QuerySession│───▶│   Orchestrator   │
//!                   │ (websocket) │    │   (HTTP, LLM)    │
//!                   └─────────────┘    └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! delphic init                                  # create database
//! delphic create --title "Handbook" docs/       # upload a collection
//! delphic index 1                               # build indexes in the foreground
//! delphic serve                                 # HTTP + websocket server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite collection store |
//! | [`traits`] | Engine and index-builder collaborator traits |
//! | [`orchestrator`] | HTTP client for the LLM orchestration service |
//! | [`jobs`] | Background indexing jobs and worker queue |
//! | [`session`] | Per-socket query sessions |
//! | [`server`] | HTTP and websocket server |
//! | [`logging`] | tracing subscriber setup |

pub mod config;
pub mod db;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod traits;
