//! Startup reconciliation of failed media operations.
//!
//! Lists every pending upload and delete and retries each one against the
//! object store. A success removes the record; a failure leaves it for the
//! next process start. There is no backoff and no retry limit.

use crate::{
    models::{pending_delete::PendingDelete, pending_upload::PendingUpload},
    services::{
        object_store::ObjectStore,
        retry_queue::{QueueError, QueueResult, RetryQueue},
    },
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome counts for one record kind.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub attempted: usize,
    pub cleared: usize,
    pub failed: usize,
}

impl PassStats {
    fn tally(results: Vec<QueueResult<bool>>) -> QueueResult<Self> {
        let mut stats = PassStats::default();
        let mut first_err: Option<QueueError> = None;
        for result in results {
            stats.attempted += 1;
            match result {
                Ok(true) => stats.cleared += 1,
                Ok(false) => stats.failed += 1,
                Err(err) => {
                    stats.failed += 1;
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub uploads: PassStats,
    pub deletes: PassStats,
}

/// Retry every queued upload and delete once.
///
/// The two record kinds are processed concurrently and independently. A
/// remote failure only affects its own record; queue I/O errors are returned
/// after every record in the pass has been attempted.
pub async fn reconcile(queue: &RetryQueue, store: &dyn ObjectStore) -> QueueResult<ReconcileReport> {
    let (uploads, deletes) = tokio::join!(retry_uploads(queue, store), retry_deletes(queue, store));
    let report = ReconcileReport {
        uploads: uploads?,
        deletes: deletes?,
    };

    info!(
        "reconciliation: uploads {}/{} cleared, deletes {}/{} cleared",
        report.uploads.cleared,
        report.uploads.attempted,
        report.deletes.cleared,
        report.deletes.attempted
    );
    Ok(report)
}

async fn retry_uploads(queue: &RetryQueue, store: &dyn ObjectStore) -> QueueResult<PassStats> {
    let pending = queue.list_uploads().await?;
    let results = join_all(pending.iter().map(|record| retry_upload(queue, store, record))).await;
    PassStats::tally(results)
}

async fn retry_upload(
    queue: &RetryQueue,
    store: &dyn ObjectStore,
    record: &PendingUpload,
) -> QueueResult<bool> {
    let token = Some(record.resume_token.as_str()).filter(|t| !t.is_empty());
    match store
        .upload(&record.remote_image_path, &record.local_image_uri, token)
        .await
    {
        Ok(stored) => {
            debug!("retried upload {} -> {}", record.id, stored.key);
            queue.remove_upload(record.id).await?;
            Ok(true)
        }
        Err(err) => {
            warn!(
                "upload retry for {} failed, keeping record {}: {}",
                record.remote_image_path, record.id, err
            );
            Ok(false)
        }
    }
}

async fn retry_deletes(queue: &RetryQueue, store: &dyn ObjectStore) -> QueueResult<PassStats> {
    let pending = queue.list_deletes().await?;
    let results = join_all(pending.iter().map(|record| retry_delete(queue, store, record))).await;
    PassStats::tally(results)
}

async fn retry_delete(
    queue: &RetryQueue,
    store: &dyn ObjectStore,
    record: &PendingDelete,
) -> QueueResult<bool> {
    match store.delete(&record.remote_image_path).await {
        Ok(()) => {
            debug!("retried delete {} of {}", record.id, record.remote_image_path);
            queue.remove_delete(record.id).await?;
            Ok(true)
        }
        Err(err) => {
            warn!(
                "delete retry for {} failed, keeping record {}: {}",
                record.remote_image_path, record.id, err
            );
            Ok(false)
        }
    }
}
