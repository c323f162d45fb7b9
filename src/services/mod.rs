pub mod diary_observer;
pub mod entry_repository;
pub mod journal_service;
pub mod media_sync;
pub mod object_store;
pub mod reconcile;
pub mod retry_queue;
pub mod session;
