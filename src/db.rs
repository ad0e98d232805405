//! SQLite pool for collection and document rows.
//!
//! Status reads from the HTTP handlers and status writes from the job
//! workers share one WAL-mode database. Writers wait on a busy timeout
//! instead of failing with `SQLITE_BUSY` when a worker holds the lock.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections reserved for HTTP handlers on top of one per job worker.
const HANDLER_CONNECTIONS: u32 = 4;

/// Open the pool for `[db].path`, sized for the configured job workers.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let workers = u32::try_from(config.jobs.workers.max(1)).unwrap_or(u32::MAX);
    open_pool(&config.db.path, workers.saturating_add(HANDLER_CONNECTIONS)).await
}

/// Open (creating if needed) the database at `path` and its parent
/// directories.
pub async fn open_pool(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("opening database {}", path.display()))?;

    tracing::debug!(path = %path.display(), max_connections, "database opened");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_pool_creates_nested_wal_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/delphic.sqlite");

        let pool = open_pool(&path, 2).await.unwrap();
        assert!(path.is_file());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn test_open_pool_accepts_paths_with_url_characters() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("data?mode=ro#x.sqlite");

        let pool = open_pool(&path, 1).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        assert!(path.is_file());
    }
}
