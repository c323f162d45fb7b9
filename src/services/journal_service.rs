//! Entry writes followed by their media work.
//!
//! Each step is its own operation: the entry write commits first, then
//! images are uploaded or deleted. A crash in between is tolerated because
//! failed media calls land in the retry queue.

use crate::{
    models::{entry::Entry, request_state::RequestState},
    services::{
        entry_repository::{EntryRepository, RepositoryError},
        media_sync::{LocalImage, MediaError, MediaSync, owner_prefix},
        retry_queue::QueueError,
        session::{Session, User},
    },
};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Repository(Arc<RepositoryError>),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("operation did not produce a result")]
    Incomplete,
}

impl From<QueueError> for JournalError {
    fn from(err: QueueError) -> Self {
        JournalError::Media(MediaError::Queue(err))
    }
}

impl From<RepositoryError> for JournalError {
    fn from(err: RepositoryError) -> Self {
        JournalError::Repository(Arc::new(err))
    }
}

pub type JournalResult<T> = Result<T, JournalError>;

fn settle<T>(state: RequestState<T>) -> JournalResult<T> {
    match state {
        RequestState::Success(data) => Ok(data),
        RequestState::Error(err) => Err(JournalError::Repository(err)),
        RequestState::Idle | RequestState::Loading => Err(JournalError::Incomplete),
    }
}

fn owned_key(prefix: &str, key: &str) -> bool {
    let owned = key.starts_with(prefix) && !key.contains("..");
    if !owned {
        warn!("ignoring image key `{}` outside {}", key, prefix);
    }
    owned
}

#[derive(Clone)]
pub struct JournalService {
    repository: Arc<dyn EntryRepository>,
    media: MediaSync,
    session: Session,
}

impl JournalService {
    pub fn new(repository: Arc<dyn EntryRepository>, media: MediaSync, session: Session) -> Self {
        Self {
            repository,
            media,
            session,
        }
    }

    pub fn media(&self) -> &MediaSync {
        &self.media
    }

    /// Insert or update `entry`, then upload `new_images` and delete `removed`.
    ///
    /// The stored image list is the entry's list without `removed`, followed
    /// by the keys of `new_images`. Keys outside the owner's image prefix are
    /// dropped, and only images the stored entry referenced are deleted.
    ///
    /// The insert-or-update choice is made before the write. A concurrent
    /// insert of the same id surfaces as `AlreadyExists`.
    pub async fn save(
        &self,
        mut entry: Entry,
        new_images: Vec<LocalImage>,
        removed: Vec<String>,
    ) -> JournalResult<Entry> {
        let prefix = owner_prefix(&self.require_user()?.id);
        let previous = self.stored(entry.id).await?;

        let new_images: Vec<LocalImage> = new_images
            .into_iter()
            .filter(|image| owned_key(&prefix, &image.remote_image_path))
            .collect();
        entry
            .images
            .retain(|key| owned_key(&prefix, key) && !removed.contains(key));
        for image in &new_images {
            if !entry.images.contains(&image.remote_image_path) {
                entry.images.push(image.remote_image_path.clone());
            }
        }

        let doomed: Vec<String> = match &previous {
            Some(stored) => removed
                .into_iter()
                .filter(|key| stored.images.contains(key) && owned_key(&prefix, key))
                .collect(),
            None => Vec::new(),
        };

        let stored = if previous.is_some() {
            settle(self.repository.update(entry).await)?
        } else {
            settle(self.repository.insert(entry).await)?
        };

        let uploads = self.media.upload_images(&new_images).await?;
        let deletes = self.media.delete_images(&doomed).await?;
        debug!(
            "saved entry {}: uploads {:?}, deletes {:?}",
            stored.id, uploads, deletes
        );
        Ok(stored)
    }

    fn require_user(&self) -> JournalResult<User> {
        Ok(self
            .session
            .current_user()
            .ok_or(RepositoryError::UserNotAuthenticated)?)
    }

    /// The caller's stored entry with this id, if there is one.
    async fn stored(&self, id: Uuid) -> JournalResult<Option<Entry>> {
        let first = self
            .repository
            .observe_one(id)
            .next()
            .await
            .unwrap_or(RequestState::Idle);
        match settle(first.map(Some)) {
            Err(JournalError::Repository(err))
                if matches!(*err, RepositoryError::EntityNotFound(_)) =>
            {
                Ok(None)
            }
            other => other,
        }
    }

    /// Delete the entry, then the caller's images it referenced.
    pub async fn delete(&self, id: Uuid) -> JournalResult<Entry> {
        let prefix = owner_prefix(&self.require_user()?.id);
        let deleted = settle(self.repository.delete(id).await)?;
        let owned: Vec<String> = deleted
            .images
            .iter()
            .filter(|key| owned_key(&prefix, key))
            .cloned()
            .collect();
        self.media.delete_images(&owned).await?;
        Ok(deleted)
    }

    /// Purge every image of the signed-in owner, then all of their entries.
    ///
    /// If the owner's images cannot be listed nothing is deleted.
    pub async fn delete_all(&self) -> JournalResult<bool> {
        let user = self.require_user()?;
        let report = self.media.purge_owner_images(&user.id).await?;
        let deleted = settle(self.repository.delete_all().await)?;
        info!("deleted all entries for {} (images: {:?})", user.id, report);
        Ok(deleted)
    }
}
