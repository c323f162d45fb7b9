//! Handlers for the observed diaries view.

use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub struct ObserveReq {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET `/diaries`: the latest published state of the live subscription.
pub async fn current_diaries(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.observer.current())
}

/// POST `/diaries/observe`: switch to the filtered view when both bounds
/// are given, otherwise to the unfiltered one.
pub async fn observe_diaries(
    State(state): State<AppState>,
    Json(req): Json<ObserveReq>,
) -> Result<impl IntoResponse, AppError> {
    let range = match (req.from, req.to) {
        (Some(from), Some(to)) if from <= to => Some((from, to)),
        (Some(_), Some(_)) => return Err(AppError::bad_request("`from` must not be after `to`")),
        (None, None) => None,
        _ => {
            return Err(AppError::bad_request(
                "`from` and `to` must be given together",
            ));
        }
    };

    state.observer.get_diaries(range).await;
    Ok(Json(state.observer.mode().await))
}
