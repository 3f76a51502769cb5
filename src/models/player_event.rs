use serde::Deserialize;
use serde_json::Value;

use super::{progress::lenient, MediaKind, ProgressKey, ProgressSample, TitleId};

/// Top-level discriminator the embedded player puts on its messages
pub const PLAYER_EVENT_TAG: &str = "PLAYER_EVENT";

/// Event kinds emitted by the embedded player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerEventKind {
    Play,
    Pause,
    Ended,
    Timeupdate,
    Seek,
    /// Anything else the player decides to send
    #[serde(other)]
    Other,
}

impl PlayerEventKind {
    /// Whether this event may change persisted progress
    pub fn is_durable(self) -> bool {
        matches!(
            self,
            PlayerEventKind::Pause | PlayerEventKind::Ended | PlayerEventKind::Timeupdate
        )
    }

    /// Deliberate stop points are written regardless of the save interval
    pub fn bypasses_throttle(self) -> bool {
        matches!(self, PlayerEventKind::Pause | PlayerEventKind::Ended)
    }
}

/// A recognized player event with its telemetry
///
/// The player tags its events with the title it is playing; either tag may be missing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerEvent {
    pub event: PlayerEventKind,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<TitleId>,
    #[serde(rename = "mediaType", default, deserialize_with = "lenient")]
    pub media_type: Option<MediaKind>,
    #[serde(flatten)]
    pub sample: ProgressSample,
}

impl PlayerEvent {
    /// Whether this event may belong to `key`; a missing tag matches any title
    pub fn targets(&self, key: ProgressKey) -> bool {
        self.id.map_or(true, |id| id == key.title_id)
            && self.media_type.map_or(true, |kind| kind == key.media_kind)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Interprets an untrusted message from the embedded player
///
/// String payloads are parsed as JSON first. Anything that is not a player-event
/// envelope with an object payload yields `None`; this is expected noise, not an error.
pub fn parse_player_message(payload: &Value) -> Option<PlayerEvent> {
    let decoded;
    let value = match payload {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text).ok()?;
            &decoded
        }
        other => other,
    };

    let envelope = Envelope::deserialize(value).ok()?;
    if envelope.tag != PLAYER_EVENT_TAG {
        return None;
    }

    let data = envelope.data.filter(Value::is_object)?;
    serde_json::from_value(data).ok()
}
