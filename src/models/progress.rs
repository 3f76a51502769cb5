use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{MediaKind, ProgressKey, TitleId};

/// Persisted snapshot of playback position for one title
///
/// Field names on the wire match what the browser build has always written to local
/// storage. Fields this version does not know about are carried through in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "id")]
    pub title_id: TitleId,
    #[serde(rename = "mediaType")]
    pub media_kind: MediaKind,
    #[serde(rename = "currentTime")]
    pub position_seconds: f64,
    #[serde(rename = "duration")]
    pub total_seconds: f64,
    #[serde(rename = "progress")]
    pub percent_complete: f64,
    #[serde(rename = "season", default, skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(rename = "episode", default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    /// Epoch millis of the player event that produced this record
    #[serde(rename = "timestamp")]
    pub event_timestamp: i64,
    /// Epoch millis of the last store write; assigned by the store
    #[serde(rename = "lastWatched", default)]
    pub last_watched_at: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressRecord {
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.title_id, self.media_kind)
    }

    pub fn remaining_seconds(&self) -> f64 {
        (self.total_seconds - self.position_seconds).max(0.0)
    }
}

/// Raw playback telemetry, as reported by the player or a client
///
/// Every field is optional because the reporting side is not trusted to send
/// complete data; [`ProgressSample::into_record`] decides whether it is usable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    #[serde(default, deserialize_with = "lenient")]
    pub current_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub season: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub episode: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<i64>,
}

/// Optional field that reads as absent when the value has the wrong shape
///
/// One bad field (a negative season, a fractional timestamp) must not cost the rest
/// of the sample.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

impl ProgressSample {
    /// Normalizes the sample into a record for `key`
    ///
    /// Returns `None` when position or duration is missing or unusable. The
    /// completion percent is taken from the sample when present, else derived.
    pub fn into_record(self, key: ProgressKey, now_millis: i64) -> Option<ProgressRecord> {
        let position = self.current_time.filter(|p| p.is_finite() && *p >= 0.0)?;
        let total = self.duration.filter(|d| d.is_finite() && *d > 0.0)?;

        let percent = self
            .progress
            .filter(|p| p.is_finite())
            .unwrap_or(position * 100.0 / total);

        let (season_number, episode_number) = match key.media_kind {
            MediaKind::Series => (
                self.season.filter(|s| *s > 0),
                self.episode.filter(|e| *e > 0),
            ),
            MediaKind::Movie => (None, None),
        };

        Some(ProgressRecord {
            title_id: key.title_id,
            media_kind: key.media_kind,
            position_seconds: position,
            total_seconds: total,
            percent_complete: percent,
            season_number,
            episode_number,
            event_timestamp: self.timestamp.unwrap_or(now_millis),
            last_watched_at: 0,
            extra: Map::new(),
        })
    }
}
