use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Display metadata for one video, as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub duration: String,
    pub thumbnail: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl VideoInfo {
    /// Parses the object printed by `--dump-json`.
    pub fn from_dump(stdout: &[u8]) -> Result<Self, JobError> {
        let info: YtDlpVideoInfo = serde_json::from_slice(stdout)
            .map_err(|error| JobError::MetadataFetch(error.to_string()))?;

        let seconds = info
            .duration
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(|value| value as u64)
            .unwrap_or_default();

        Ok(Self {
            title: info.title.unwrap_or_default(),
            duration: format_duration(seconds),
            thumbnail: info.thumbnail.unwrap_or_default(),
            description: info.description.unwrap_or_default(),
        })
    }
}

/// `HH:MM:SS` from one hour up, `MM:SS` below that.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
