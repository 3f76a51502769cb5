use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt::Display, str::FromStr};

pub mod metadata;
pub mod player_event;
pub mod progress;

pub use metadata::{
    format_runtime, CastMember, Credits, MovieMetadata, Paged, SearchResult, SeriesMetadata,
    TitleMetadata, TmdbTitle,
};
pub use player_event::{parse_player_message, PlayerEvent, PlayerEventKind, PLAYER_EVENT_TAG};
pub use progress::{ProgressRecord, ProgressSample};

/// External metadata API identifier for a title
///
/// Accepts both JSON numbers and numeric strings on input, since route parameters
/// and older persisted records carry the id as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TitleId(pub u64);

impl<'de> Deserialize<'de> for TitleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(id) => Ok(TitleId(id)),
            RawId::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl FromStr for TitleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(TitleId)
            .map_err(|_| format!("invalid title id: {:?}", s))
    }
}

impl Display for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Disambiguates the id namespace of the metadata API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "movie")]
    Movie,
    #[serde(rename = "tv", alias = "series")]
    Series,
}

impl MediaKind {
    /// Path segment used by both the metadata API and the embedded player
    pub fn as_path(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "tv" | "series" => Ok(MediaKind::Series),
            other => Err(format!("unknown media kind: {:?}", other)),
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Identity of a progress record: one record per (title, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressKey {
    pub title_id: TitleId,
    pub media_kind: MediaKind,
}

impl ProgressKey {
    pub fn new(title_id: TitleId, media_kind: MediaKind) -> Self {
        Self {
            title_id,
            media_kind,
        }
    }
}

impl Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.media_kind, self.title_id)
    }
}
