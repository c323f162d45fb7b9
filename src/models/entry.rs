//! Represents a journal entry stored in the entry store.

use super::mood::Mood;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single journal entry.
///
/// `id` never changes after creation and `owner_id` is assigned by the
/// repository on insert; callers cannot choose it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Entry {
    /// Globally unique entry id.
    pub id: Uuid,

    /// Identity of the owning user.
    #[serde(default)]
    pub owner_id: String,

    pub title: String,

    pub description: String,

    #[serde(default)]
    pub mood: Mood,

    /// When the entry was created or last re-dated by the user.
    pub date: DateTime<Utc>,

    /// Object store keys of attached images, in display order.
    #[serde(default)]
    pub images: Vec<String>,
}

impl Entry {
    /// Create a fresh, unowned entry dated now.
    pub fn new(title: impl Into<String>, description: impl Into<String>, mood: Mood) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: String::new(),
            title: title.into(),
            description: description.into(),
            mood,
            date: Utc::now(),
            images: Vec::new(),
        }
    }

    /// Calendar day of this entry in the local timezone.
    pub fn local_day(&self) -> NaiveDate {
        self.date.with_timezone(&Local).date_naive()
    }
}

/// Entries that share one local calendar day.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DayGroup {
    pub day: NaiveDate,
    pub entries: Vec<Entry>,
}

/// Day groups in query order.
pub type Diaries = Vec<DayGroup>;

/// Group already-sorted entries by local day.
///
/// Group order follows the first appearance of each day, so a sorted input
/// yields sorted groups. Non-adjacent entries of the same day still land in
/// the same group.
pub fn group_by_day(entries: Vec<Entry>) -> Diaries {
    let mut groups: Diaries = Vec::new();
    for entry in entries {
        let day = entry.local_day();
        match groups.iter_mut().find(|group| group.day == day) {
            Some(group) => group.entries.push(entry),
            None => groups.push(DayGroup {
                day,
                entries: vec![entry],
            }),
        }
    }
    groups
}
