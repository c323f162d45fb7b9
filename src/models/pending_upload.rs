//! Represents an image transfer that was interrupted and awaits retry.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A queued upload, persisted when a transfer reports a recoverable interruption.
///
/// Rows are never mutated: a successful retry removes the row, a failed one
/// leaves it for the next reconciliation pass.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    /// Auto-assigned row id (0 until inserted).
    pub id: i64,

    /// Destination key in the object store (e.g. `images/{owner}/a.jpg-1700000000000.jpg`).
    pub remote_image_path: String,

    /// Locator of the source file on this device.
    pub local_image_uri: String,

    /// Opaque continuation token for the partially completed transfer.
    pub resume_token: String,
}

impl PendingUpload {
    pub fn new(
        remote_image_path: impl Into<String>,
        local_image_uri: impl Into<String>,
        resume_token: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            remote_image_path: remote_image_path.into(),
            local_image_uri: local_image_uri.into(),
            resume_token: resume_token.into(),
        }
    }
}
