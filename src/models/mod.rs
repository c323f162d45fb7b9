//! Core data models for the journal sync service.
//!
//! Pending records map to the local retry-queue tables via `sqlx::FromRow`.
//! Entries are documents in the owner-partitioned entry store, and
//! `RequestState` is the envelope every asynchronous read hands out.

pub mod entry;
pub mod mood;
pub mod pending_delete;
pub mod pending_upload;
pub mod request_state;
