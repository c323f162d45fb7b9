use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    diary_observer::DiaryObserver,
    entry_repository::{EntryRepository, SqliteEntryRepository},
    journal_service::JournalService,
    media_sync::MediaSync,
    object_store::{FsObjectStore, ObjectStore},
    reconcile::reconcile,
    retry_queue::RetryQueue,
    session::{Session, User},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting journal-sync with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connections ---
    let queue_db = Arc::new(db::connect(&cfg.queue_database_url).await?);
    let entries_db = Arc::new(db::connect(&cfg.entries_database_url).await?);

    let session = Session::new(cfg.user.clone().map(User::new));
    let queue = RetryQueue::new(queue_db);
    let entries = SqliteEntryRepository::new(entries_db.clone(), session.clone());

    queue.ensure_schema().await?;
    entries.ensure_schema().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(cfg.storage_dir.clone()));
    let repository: Arc<dyn EntryRepository> = Arc::new(entries);
    let media = MediaSync::new(store.clone(), queue.clone());
    let journal = JournalService::new(repository.clone(), media, session.clone());
    let observer = Arc::new(DiaryObserver::new(repository.clone(), cfg.debounce));

    // --- Startup reconciliation of failed media operations ---
    let reconcile_queue = queue.clone();
    let reconcile_store = store.clone();
    let reconcile_task = tokio::spawn(async move {
        match reconcile(&reconcile_queue, reconcile_store.as_ref()).await {
            Ok(report) => tracing::debug!("reconciliation report: {:?}", report),
            Err(err) => tracing::error!("reconciliation aborted: {}", err),
        }
    });

    // --- Trace published diary states ---
    let mut diary_states = observer.subscribe();
    let state_logger = tokio::spawn(async move {
        while diary_states.changed().await.is_ok() {
            let state = diary_states.borrow_and_update().clone();
            if state.is_loading() {
                tracing::debug!("diaries loading");
            } else if let Some(groups) = state.success() {
                tracing::debug!("diaries updated: {} day groups", groups.len());
            } else if let Some(err) = state.cause() {
                tracing::warn!("diaries query failed: {}", err);
            }
        }
    });

    observer.get_diaries(None).await;

    let state = state::AppState {
        session,
        queue,
        repository,
        observer: observer.clone(),
        journal,
        entries_db,
        storage_dir: cfg.storage_dir.clone().into(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    // --- Teardown: cancel outstanding tasks ---
    observer.shutdown().await;
    reconcile_task.abort();
    state_logger.abort();

    Ok(())
}
