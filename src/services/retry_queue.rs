//! src/services/retry_queue.rs
//!
//! RetryQueue: durable, local-only record of media operations that failed
//! and must be retried. One SQLite table per operation kind; rows are
//! inserted, listed and removed, never updated in place.

use crate::{
    db,
    models::{pending_delete::PendingDelete, pending_upload::PendingUpload},
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current queue schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_retry_queue.sql");

/// Storage-layer failures. There is no fallback below the queue, so these
/// propagate to the caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    pub uploads: i64,
    pub deletes: i64,
}

#[derive(Clone)]
pub struct RetryQueue {
    /// Shared SQLite connection pool for the local queue database.
    pub db: Arc<SqlitePool>,
}

impl RetryQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Bring the schema to `SCHEMA_VERSION`.
    ///
    /// Migrations are destructive: on a version mismatch both tables are
    /// dropped and recreated empty.
    pub async fn ensure_schema(&self) -> QueueResult<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&*self.db)
            .await?;

        let mut tx = self.db.begin().await?;
        if version != SCHEMA_VERSION {
            if version != 0 {
                warn!(
                    "retry queue schema version {} != {}, recreating tables",
                    version, SCHEMA_VERSION
                );
            }
            sqlx::query("DROP TABLE IF EXISTS pending_uploads")
                .execute(&mut *tx)
                .await?;
            sqlx::query("DROP TABLE IF EXISTS pending_deletes")
                .execute(&mut *tx)
                .await?;
        }
        for stmt in db::statements(SCHEMA_SQL) {
            debug!("Executing queue schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("retry queue schema at version {}", SCHEMA_VERSION);
        Ok(())
    }

    pub async fn add_upload(&self, record: &PendingUpload) -> QueueResult<PendingUpload> {
        let row = sqlx::query_as::<_, PendingUpload>(
            "INSERT INTO pending_uploads (remote_image_path, local_image_uri, resume_token)
             VALUES (?, ?, ?)
             RETURNING id, remote_image_path, local_image_uri, resume_token",
        )
        .bind(&record.remote_image_path)
        .bind(&record.local_image_uri)
        .bind(&record.resume_token)
        .fetch_one(&*self.db)
        .await?;
        debug!("queued upload {} for {}", row.id, row.remote_image_path);
        Ok(row)
    }

    /// Snapshot of all pending uploads, oldest first.
    pub async fn list_uploads(&self) -> QueueResult<Vec<PendingUpload>> {
        let rows = sqlx::query_as::<_, PendingUpload>(
            "SELECT id, remote_image_path, local_image_uri, resume_token
             FROM pending_uploads ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Remove an upload row. Unknown ids are a no-op.
    pub async fn remove_upload(&self, id: i64) -> QueueResult<()> {
        sqlx::query("DELETE FROM pending_uploads WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn add_delete(&self, record: &PendingDelete) -> QueueResult<PendingDelete> {
        let row = sqlx::query_as::<_, PendingDelete>(
            "INSERT INTO pending_deletes (remote_image_path) VALUES (?)
             RETURNING id, remote_image_path",
        )
        .bind(&record.remote_image_path)
        .fetch_one(&*self.db)
        .await?;
        debug!("queued delete {} for {}", row.id, row.remote_image_path);
        Ok(row)
    }

    /// Snapshot of all pending deletes, oldest first.
    pub async fn list_deletes(&self) -> QueueResult<Vec<PendingDelete>> {
        let rows = sqlx::query_as::<_, PendingDelete>(
            "SELECT id, remote_image_path FROM pending_deletes ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Remove a delete row. Unknown ids are a no-op.
    pub async fn remove_delete(&self, id: i64) -> QueueResult<()> {
        sqlx::query("DELETE FROM pending_deletes WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn counts(&self) -> QueueResult<QueueCounts> {
        let uploads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_uploads")
            .fetch_one(&*self.db)
            .await?;
        let deletes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_deletes")
            .fetch_one(&*self.db)
            .await?;
        Ok(QueueCounts { uploads, deletes })
    }
}
