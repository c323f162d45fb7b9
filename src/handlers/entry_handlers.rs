//! Handlers for single-entry reads and journal writes.

use crate::{
    errors::AppError,
    models::{entry::Entry, mood::Mood, request_state::RequestState},
    services::{media_sync::LocalImage, session::User},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct NewImageReq {
    pub local_uri: String,
    pub extension: String,
}

#[derive(Deserialize, Debug)]
pub struct SaveEntryReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mood: Mood,
    pub date: Option<DateTime<Utc>>,
    /// Keys already attached to the entry.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub new_images: Vec<NewImageReq>,
    #[serde(default)]
    pub removed_images: Vec<String>,
}

async fn save(state: &AppState, id: Uuid, req: SaveEntryReq) -> Result<Entry, AppError> {
    let owner = state
        .session
        .current_user()
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "user is not logged in"))?;

    let staged: Vec<LocalImage> = req
        .new_images
        .iter()
        .map(|img| {
            state
                .journal
                .media()
                .stage_image(&owner.id, &img.local_uri, &img.extension)
        })
        .collect();

    let mut entry = Entry::new(req.title, req.description, req.mood);
    entry.id = id;
    entry.images = req.images;
    if let Some(date) = req.date {
        entry.date = date;
    }

    Ok(state.journal.save(entry, staged, req.removed_images).await?)
}

/// POST `/entries`: create an entry.
pub async fn create_entry(
    State(state): State<AppState>,
    Json(req): Json<SaveEntryReq>,
) -> Result<impl IntoResponse, AppError> {
    let entry = save(&state, Uuid::new_v4(), req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// PUT `/entries/{id}`: create or overwrite the entry with this id.
pub async fn put_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveEntryReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(save(&state, id, req).await?))
}

/// GET `/entries/{id}`: first state of the entry's live query.
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let first = state
        .repository
        .observe_one(id)
        .next()
        .await
        .unwrap_or(RequestState::Idle);
    if let Some(err) = first.cause() {
        return Err(AppError::from(err));
    }
    first
        .success()
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::internal("entry query produced no result"))
}

/// DELETE `/entries/{id}`
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.journal.delete(id).await?))
}

/// DELETE `/entries`: every entry and image of the signed-in user.
pub async fn delete_all_entries(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.journal.delete_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/pending`: counts of queued media retries.
pub async fn pending_counts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.queue.counts().await?))
}

#[derive(Deserialize, Debug)]
pub struct LogInReq {
    pub user_id: String,
}

/// POST `/session/login`
pub async fn log_in(
    State(state): State<AppState>,
    Json(req): Json<LogInReq>,
) -> Result<impl IntoResponse, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::bad_request("`user_id` must not be empty"));
    }
    let user = User::new(req.user_id);
    state.session.log_in(user.clone());
    // Live queries capture the owner when they start.
    state.observer.get_diaries(None).await;
    Ok(Json(user))
}

/// POST `/session/logout`
pub async fn log_out(State(state): State<AppState>) -> impl IntoResponse {
    state.session.log_out();
    state.observer.get_diaries(None).await;
    StatusCode::NO_CONTENT
}
