//! The uniform envelope handed out by every asynchronous read.

use crate::services::entry_repository::RepositoryError;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Idle → Loading → Success | Error. A fresh query restarts at `Loading`.
///
/// The error cause is shared so states stay `Clone` and can sit in a
/// `watch` channel.
#[derive(Serialize, Clone, Debug, Default)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum RequestState<T> {
    #[default]
    Idle,
    Loading,
    Success(T),
    Error(#[serde(serialize_with = "serialize_cause")] Arc<RepositoryError>),
}

impl<T> RequestState<T> {
    pub fn error(err: RepositoryError) -> Self {
        RequestState::Error(Arc::new(err))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RequestState::Loading)
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            RequestState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&RepositoryError> {
        match self {
            RequestState::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Transform the payload, keeping the state tag and any error cause.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestState<U> {
        match self {
            RequestState::Idle => RequestState::Idle,
            RequestState::Loading => RequestState::Loading,
            RequestState::Success(data) => RequestState::Success(f(data)),
            RequestState::Error(err) => RequestState::Error(err),
        }
    }
}

impl<T> From<Result<T, RepositoryError>> for RequestState<T> {
    fn from(result: Result<T, RepositoryError>) -> Self {
        match result {
            Ok(data) => RequestState::Success(data),
            Err(err) => RequestState::error(err),
        }
    }
}

fn serialize_cause<S: Serializer>(
    err: &Arc<RepositoryError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_tag_and_payload() {
        let state: RequestState<u32> = RequestState::Success(7);
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"state": "success", "data": 7})
        );

        let loading: RequestState<u32> = RequestState::Loading;
        assert_eq!(
            serde_json::to_value(&loading).unwrap(),
            json!({"state": "loading"})
        );
    }

    #[test]
    fn error_serializes_as_message() {
        let state: RequestState<u32> = RequestState::error(RepositoryError::UserNotAuthenticated);
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"state": "error", "data": "user is not logged in"})
        );
    }

    #[test]
    fn map_preserves_tag() {
        let state: RequestState<u32> = RequestState::Success(2);
        assert_eq!(state.map(|n| n * 2).success(), Some(&4));
        let err: RequestState<u32> = RequestState::error(RepositoryError::UserNotAuthenticated);
        assert!(err.map(|n| n * 2).cause().is_some());
    }
}
