use serde::{Deserialize, Serialize};

use crate::{Result, ShowConfig};

/// What is currently on stage, as reported to the show page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowState {
    pub current_song: String,
}

impl ShowState {
    pub fn new(current_song: impl Into<String>) -> Self {
        Self {
            current_song: current_song.into(),
        }
    }

    pub fn from_config(config: &ShowConfig) -> Self {
        Self::new(config.default_song.clone())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
