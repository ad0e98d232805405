//! SQLite-backed [`CollectionStore`] implementation.
//!
//! Maps each store operation onto the `collections` and `documents` tables
//! created by [`migrate`](crate::migrate). Status updates read and write
//! inside one transaction so concurrent workers cannot both claim a
//! collection.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use delphic_core::error::StatusTransitionError;
use delphic_core::models::{Collection, CollectionStatus, Document, NewCollection, NewDocument};
use delphic_core::store::CollectionStore;

/// SQLite implementation of the [`CollectionStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn collection_from_row(row: &SqliteRow) -> Result<Collection> {
    let status: String = row.get("status");
    Ok(Collection {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        status: status.parse()?,
        model: row.get("model"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn create_collection(&self, new: &NewCollection) -> Result<Collection> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO collections (title, description, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new.title)
        .bind(&new.description)
        .bind(CollectionStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(Collection {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            status: CollectionStatus::Pending,
            model: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn add_document(&self, collection_id: i64, doc: &NewDocument) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (collection_id, file_name, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(collection_id)
        .bind(&doc.file_name)
        .bind(&doc.content)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>> {
        let row = sqlx::query(
            "SELECT id, title, description, status, model, created_at, updated_at FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(collection_from_row).transpose()
    }

    async fn list_documents(&self, collection_id: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, collection_id, file_name, content, created_at FROM documents WHERE collection_id = ? ORDER BY id",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Document {
                id: row.get("id"),
                collection_id: row.get("collection_id"),
                file_name: row.get("file_name"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn update_status(&self, id: i64, status: CollectionStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM collections WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current: CollectionStatus = current
            .ok_or_else(|| anyhow!("collection {} not found", id))?
            .parse()?;

        if !current.can_transition_to(status) {
            return Err(StatusTransitionError {
                from: current,
                to: status,
            }
            .into());
        }

        sqlx::query("UPDATE collections SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_model(&self, id: i64, model: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE collections SET model = ? WHERE id = ?")
            .bind(model)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("collection {} not found", id);
        }
        Ok(())
    }
}
