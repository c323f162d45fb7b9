//! Represents a remote image deletion that failed and awaits retry.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct PendingDelete {
    /// Auto-assigned row id (0 until inserted).
    pub id: i64,

    /// Object store key that still has to be removed.
    pub remote_image_path: String,
}

impl PendingDelete {
    pub fn new(remote_image_path: impl Into<String>) -> Self {
        Self {
            id: 0,
            remote_image_path: remote_image_path.into(),
        }
    }
}
