//! Shared handles passed to every HTTP handler.

use crate::services::{
    diary_observer::DiaryObserver, entry_repository::EntryRepository,
    journal_service::JournalService, retry_queue::RetryQueue, session::Session,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    pub queue: RetryQueue,
    pub repository: Arc<dyn EntryRepository>,
    pub observer: Arc<DiaryObserver>,
    pub journal: JournalService,
    /// Entry store pool, kept for readiness probing.
    pub entries_db: Arc<SqlitePool>,
    pub storage_dir: PathBuf,
}
