//! Image transfers with durable fallback.
//!
//! Every upload or delete is attempted once. A failure that can be retried
//! becomes a queue record and the call returns; the startup reconciliation
//! pass picks it up later.

use crate::{
    models::{pending_delete::PendingDelete, pending_upload::PendingUpload},
    services::{
        object_store::{ObjectStore, ObjectStoreError},
        retry_queue::{QueueError, RetryQueue},
    },
};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// An image on this device paired with its destination key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocalImage {
    pub local_uri: String,
    pub remote_image_path: String,
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaReport {
    pub succeeded: usize,
    pub queued: usize,
    pub dropped: usize,
}

enum Outcome {
    Done,
    Queued,
    Dropped,
}

impl MediaReport {
    fn tally(outcomes: Vec<Result<Outcome, QueueError>>) -> Result<Self, QueueError> {
        let mut report = MediaReport::default();
        for outcome in outcomes {
            match outcome? {
                Outcome::Done => report.succeeded += 1,
                Outcome::Queued => report.queued += 1,
                Outcome::Dropped => report.dropped += 1,
            }
        }
        Ok(report)
    }
}

/// `images/{owner}/{file_segment}-{epoch_millis}.{extension}`
pub fn image_key(owner: &str, local_uri: &str, extension: &str, epoch_millis: i64) -> String {
    let segment = local_uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("images/{}/{}-{}.{}", owner, segment, epoch_millis, extension)
}

pub fn owner_prefix(owner: &str) -> String {
    format!("images/{}/", owner)
}

#[derive(Clone)]
pub struct MediaSync {
    store: Arc<dyn ObjectStore>,
    queue: RetryQueue,
}

impl MediaSync {
    pub fn new(store: Arc<dyn ObjectStore>, queue: RetryQueue) -> Self {
        Self { store, queue }
    }

    /// Pair a local file with a fresh key under the owner's image prefix.
    pub fn stage_image(&self, owner: &str, local_uri: &str, extension: &str) -> LocalImage {
        let key = image_key(owner, local_uri, extension, Utc::now().timestamp_millis());
        debug!("staged {} as {}", local_uri, key);
        LocalImage {
            local_uri: local_uri.to_string(),
            remote_image_path: key,
        }
    }

    pub async fn upload_images(&self, images: &[LocalImage]) -> Result<MediaReport, QueueError> {
        let outcomes = join_all(images.iter().map(|image| self.upload_one(image))).await;
        MediaReport::tally(outcomes)
    }

    async fn upload_one(&self, image: &LocalImage) -> Result<Outcome, QueueError> {
        match self
            .store
            .upload(&image.remote_image_path, &image.local_uri, None)
            .await
        {
            Ok(_) => Ok(Outcome::Done),
            Err(ObjectStoreError::Interrupted {
                resume_token,
                source,
                ..
            }) => {
                debug!(
                    "upload of {} interrupted ({}), queueing",
                    image.remote_image_path, source
                );
                self.queue
                    .add_upload(&PendingUpload::new(
                        &image.remote_image_path,
                        &image.local_uri,
                        resume_token,
                    ))
                    .await?;
                Ok(Outcome::Queued)
            }
            Err(ObjectStoreError::Io(err)) => {
                debug!(
                    "upload of {} failed before transfer ({}), queueing",
                    image.remote_image_path, err
                );
                self.queue
                    .add_upload(&PendingUpload::new(
                        &image.remote_image_path,
                        &image.local_uri,
                        "",
                    ))
                    .await?;
                Ok(Outcome::Queued)
            }
            Err(err) => {
                warn!("dropping upload of {}: {}", image.remote_image_path, err);
                Ok(Outcome::Dropped)
            }
        }
    }

    pub async fn delete_images(&self, paths: &[String]) -> Result<MediaReport, QueueError> {
        let outcomes = join_all(paths.iter().map(|path| self.delete_one(path))).await;
        MediaReport::tally(outcomes)
    }

    async fn delete_one(&self, path: &str) -> Result<Outcome, QueueError> {
        match self.store.delete(path).await {
            Ok(()) => Ok(Outcome::Done),
            Err(ObjectStoreError::InvalidKey(key)) => {
                warn!("dropping delete of invalid key `{}`", key);
                Ok(Outcome::Dropped)
            }
            Err(err) => {
                debug!("delete of {} failed ({}), queueing", path, err);
                self.queue.add_delete(&PendingDelete::new(path)).await?;
                Ok(Outcome::Queued)
            }
        }
    }

    /// Delete every image stored under the owner's prefix.
    ///
    /// A listing failure aborts before anything is deleted.
    pub async fn purge_owner_images(&self, owner: &str) -> Result<MediaReport, MediaError> {
        let keys = self.store.list(&owner_prefix(owner)).await?;
        Ok(self.delete_images(&keys).await?)
    }
}
