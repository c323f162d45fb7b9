//! Defines routes for the local journal API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Diaries view**
//!   - `GET    /diaries`: current state of the live subscription
//!   - `POST   /diaries/observe`: switch between unfiltered and date-filtered views
//!
//! - **Entries**
//!   - `POST   /entries`: create
//!   - `DELETE /entries`: delete everything owned by the caller
//!   - `GET    /entries/{id}`: read one
//!   - `PUT    /entries/{id}`: create or update
//!   - `DELETE /entries/{id}`: delete one
//!
//! - **Maintenance**
//!   - `GET    /pending`: queued media retries
//!   - `POST   /session/login`, `POST /session/logout`

use crate::{
    handlers::{
        diary_handlers::{current_diaries, observe_diaries},
        entry_handlers::{
            create_entry, delete_all_entries, delete_entry, get_entry, log_in, log_out,
            pending_counts, put_entry,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/diaries", get(current_diaries))
        .route("/diaries/observe", post(observe_diaries))
        .route("/entries", post(create_entry).delete(delete_all_entries))
        .route(
            "/entries/{id}",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/pending", get(pending_counts))
        .route("/session/login", post(log_in))
        .route("/session/logout", post(log_out))
}
