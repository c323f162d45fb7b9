//! Mood tags an entry can carry.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Closed set of mood labels. Stored and serialized by name.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mood {
    #[default]
    Neutral,
    Angry,
    Happy,
    Bored,
    Calm,
    Depressed,
    Disappointed,
    Humorous,
    Lonely,
    Mysterious,
    Romantic,
    Shameful,
    Awful,
    Surprised,
    Suspicious,
    Tense,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown mood `{0}`")]
pub struct UnknownMood(pub String);

impl Mood {
    pub const ALL: [Mood; 16] = [
        Mood::Neutral,
        Mood::Angry,
        Mood::Happy,
        Mood::Bored,
        Mood::Calm,
        Mood::Depressed,
        Mood::Disappointed,
        Mood::Humorous,
        Mood::Lonely,
        Mood::Mysterious,
        Mood::Romantic,
        Mood::Shameful,
        Mood::Awful,
        Mood::Surprised,
        Mood::Suspicious,
        Mood::Tense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Neutral => "Neutral",
            Mood::Angry => "Angry",
            Mood::Happy => "Happy",
            Mood::Bored => "Bored",
            Mood::Calm => "Calm",
            Mood::Depressed => "Depressed",
            Mood::Disappointed => "Disappointed",
            Mood::Humorous => "Humorous",
            Mood::Lonely => "Lonely",
            Mood::Mysterious => "Mysterious",
            Mood::Romantic => "Romantic",
            Mood::Shameful => "Shameful",
            Mood::Awful => "Awful",
            Mood::Surprised => "Surprised",
            Mood::Suspicious => "Suspicious",
            Mood::Tense => "Tense",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .iter()
            .copied()
            .find(|mood| mood.as_str() == s)
            .ok_or_else(|| UnknownMood(s.to_string()))
    }
}
