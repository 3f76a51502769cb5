use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{
    models::{parse_player_message, PlayerEvent, ProgressKey, ProgressRecord},
    services::progress_store::ProgressStore,
};

/// Minimum spacing between saves triggered by `timeupdate`
pub const SAVE_INTERVAL: Duration = Duration::from_millis(5000);

/// A session that sees no event for its title for this long closes itself (30 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const BUS_CAPACITY: usize = 256;
const INBOX_CAPACITY: usize = 64;

/// Process-wide channel carrying raw messages from embedded players
///
/// Every active playback session subscribes; publishing with no subscribers is fine.
#[derive(Clone)]
pub struct PlayerMessageBus {
    tx: broadcast::Sender<Value>,
}

impl Default for PlayerMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerMessageBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Returns how many sessions received the message
    pub fn publish(&self, message: Value) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Filters and throttles player messages for one title into store writes
///
/// Message order is not trusted: out-of-order or repeated `timeupdate`s are absorbed
/// by the save watermark and the store's last-write-wins upsert. Events tagged with
/// another title are not this ingestor's to save.
pub struct PlayerEventIngestor {
    store: ProgressStore,
    key: ProgressKey,
    last_save: Option<Instant>,
}

impl PlayerEventIngestor {
    pub fn new(store: ProgressStore, key: ProgressKey) -> Self {
        Self {
            store,
            key,
            last_save: None,
        }
    }

    pub fn key(&self) -> ProgressKey {
        self.key
    }

    /// Handles one inbound message, returning the record written to the store, if any
    pub fn handle_message(&mut self, payload: &Value, now: Instant) -> Option<ProgressRecord> {
        let event = self.recognize(payload)?;
        let record = self.admit(event, now)?;
        self.store.write(record.clone());
        Some(record)
    }

    /// Parses `payload` and keeps it only if it is a player event for this title
    pub fn recognize(&self, payload: &Value) -> Option<PlayerEvent> {
        let Some(event) = parse_player_message(payload) else {
            tracing::trace!("Ignoring unrecognized player message");
            return None;
        };

        if !event.targets(self.key) {
            tracing::trace!(key = %self.key, id = ?event.id, kind = ?event.media_type, "Ignoring player event for another title");
            return None;
        }

        Some(event)
    }

    /// Applies durability and the save interval; returns the record to persist
    pub fn admit(&mut self, event: PlayerEvent, now: Instant) -> Option<ProgressRecord> {
        if !event.event.is_durable() {
            tracing::trace!(event = ?event.event, "Observed non-durable player event");
            return None;
        }

        if !event.event.bypasses_throttle() {
            if let Some(last) = self.last_save {
                if now.saturating_duration_since(last) < SAVE_INTERVAL {
                    return None;
                }
            }
        }

        let record = event
            .sample
            .into_record(self.key, self.store.now_millis())?;

        self.last_save = Some(now);
        tracing::debug!(
            key = %self.key,
            event = ?event.event,
            position = record.position_seconds,
            percent = record.percent_complete,
            "Forwarding player progress"
        );
        Some(record)
    }
}

/// A running subscription for one playback view
///
/// The session reads the shared bus plus its own inbox. It ends when this value is
/// dropped, when [`IngestSession::stop`] is called, or after `idle_timeout` without an
/// event for its title; in every case the bus receiver is released.
pub struct IngestSession {
    key: ProgressKey,
    inbox: mpsc::Sender<Value>,
    handle: JoinHandle<()>,
}

impl IngestSession {
    pub fn start(store: ProgressStore, bus: &PlayerMessageBus, key: ProgressKey) -> Self {
        Self::start_with_idle_timeout(store, bus, key, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn start_with_idle_timeout(
        store: ProgressStore,
        bus: &PlayerMessageBus,
        key: ProgressKey,
        idle_timeout: Duration,
    ) -> Self {
        let mut rx = bus.subscribe();
        let (inbox, mut inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let writer = store.clone();
        let mut ingestor = PlayerEventIngestor::new(store, key);

        let handle = tokio::spawn(async move {
            tracing::info!(key = %key, "Playback ingest session started");
            let idle = tokio::time::sleep(idle_timeout);
            tokio::pin!(idle);

            loop {
                let message = tokio::select! {
                    received = rx.recv() => match received {
                        Ok(message) => message,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(key = %key, skipped, "Ingest session lagging, dropped player messages");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(message) = inbox_rx.recv() => message,
                    () = &mut idle => {
                        tracing::info!(key = %key, "Closing idle playback ingest session");
                        break;
                    }
                };

                let Some(event) = ingestor.recognize(&message) else {
                    continue;
                };
                idle.as_mut().reset(Instant::now() + idle_timeout);

                if let Some(record) = ingestor.admit(event, Instant::now()) {
                    if let Err(e) = writer.run_blocking(move |store| store.write(record)).await {
                        tracing::error!(key = %key, error = %e, "Error saving player progress");
                    }
                }
            }
            tracing::info!(key = %key, "Playback ingest session ended");
        });

        Self { key, inbox, handle }
    }

    pub fn key(&self) -> ProgressKey {
        self.key
    }

    /// Hands a message to this session only; false once the session has ended
    pub fn deliver(&self, message: Value) -> bool {
        if self.handle.is_finished() {
            return false;
        }
        match self.inbox.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(key = %self.key, "Ingest session inbox full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        tracing::info!(key = %self.key, "Stopping playback ingest session");
    }
}

impl Drop for IngestSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, TitleId};
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn key() -> ProgressKey {
        ProgressKey::new(TitleId(1399), MediaKind::Series)
    }

    fn store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryStorage::new()))
    }

    fn event(kind: &str, current_time: f64) -> Value {
        json!({
            "type": "PLAYER_EVENT",
            "data": {
                "event": kind,
                "currentTime": current_time,
                "duration": 3000.0,
                "season": 1,
                "episode": 2
            }
        })
    }

    #[test]
    fn test_timeupdates_inside_interval_are_throttled() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&event("timeupdate", 300.0), t0).is_some());
        assert!(ingestor
            .handle_message(&event("timeupdate", 302.0), t0 + Duration::from_millis(2000))
            .is_none());
        assert!(ingestor
            .handle_message(&event("timeupdate", 305.0), t0 + Duration::from_millis(5000))
            .is_some());
    }

    #[test]
    fn test_pause_and_ended_always_write() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&event("pause", 300.0), t0).is_some());
        assert!(ingestor
            .handle_message(&event("pause", 301.0), t0 + Duration::from_millis(100))
            .is_some());
        assert!(ingestor
            .handle_message(&event("ended", 2990.0), t0 + Duration::from_millis(200))
            .is_some());
    }

    #[test]
    fn test_pause_advances_watermark() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&event("pause", 300.0), t0).is_some());
        assert!(ingestor
            .handle_message(&event("timeupdate", 301.0), t0 + Duration::from_millis(1000))
            .is_none());
    }

    #[test]
    fn test_out_of_order_delivery_is_absorbed() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now() + Duration::from_secs(60);

        assert!(ingestor.handle_message(&event("timeupdate", 300.0), t0).is_some());
        // An instant earlier than the watermark reads as zero elapsed
        assert!(ingestor
            .handle_message(&event("timeupdate", 250.0), t0 - Duration::from_secs(10))
            .is_none());
    }

    #[test]
    fn test_non_durable_events_are_not_persisted() {
        let store = store();
        let mut ingestor = PlayerEventIngestor::new(store.clone(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&event("play", 300.0), t0).is_none());
        assert!(ingestor.handle_message(&event("seek", 900.0), t0).is_none());
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn test_incomplete_telemetry_dropped_without_moving_watermark() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now();

        let no_duration = json!({"type": "PLAYER_EVENT", "data": {"event": "timeupdate", "currentTime": 5.0}});
        assert!(ingestor.handle_message(&no_duration, t0).is_none());
        assert!(ingestor
            .handle_message(&event("timeupdate", 300.0), t0 + Duration::from_millis(10))
            .is_some());
    }

    #[test]
    fn test_noise_is_ignored() {
        let mut ingestor = PlayerEventIngestor::new(store(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&json!("not json at all"), t0).is_none());
        assert!(ingestor.handle_message(&json!({"source": "react-devtools"}), t0).is_none());
        assert!(ingestor.handle_message(&json!(42), t0).is_none());
    }

    #[test]
    fn test_forwarded_record_reaches_store() {
        let store = store();
        let mut ingestor = PlayerEventIngestor::new(store.clone(), key());

        let record = ingestor
            .handle_message(&event("pause", 600.0), Instant::now())
            .unwrap();
        assert_eq!(record.percent_complete, 20.0);

        let stored = store.get(TitleId(1399), MediaKind::Series).unwrap();
        assert_eq!(stored.position_seconds, 600.0);
        assert_eq!(stored.season_number, Some(1));
        assert_eq!(stored.episode_number, Some(2));
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_session_consumes_bus_and_releases_on_drop() {
        let store = store();
        let bus = PlayerMessageBus::new();

        let session = IngestSession::start(store.clone(), &bus, key());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(json!("garbage"));
        bus.publish(event("pause", 900.0));

        let watched = store.clone();
        assert!(wait_for(move || watched.get(TitleId(1399), MediaKind::Series).is_some()).await);

        drop(session);
        let watched = bus.clone();
        assert!(wait_for(move || watched.subscriber_count() == 0).await);
    }

    #[tokio::test]
    async fn test_stopped_session_ignores_later_messages() {
        let store = store();
        let bus = PlayerMessageBus::new();

        let session = IngestSession::start(store.clone(), &bus, key());
        session.stop();

        let watched = bus.clone();
        assert!(wait_for(move || watched.subscriber_count() == 0).await);

        assert_eq!(bus.publish(event("pause", 900.0)), 0);
        assert!(store.read_all().is_empty());
    }

    fn tagged_pause(id: &str, media_type: &str, current_time: f64) -> Value {
        json!({
            "type": "PLAYER_EVENT",
            "data": {
                "event": "pause",
                "id": id,
                "mediaType": media_type,
                "currentTime": current_time,
                "duration": 3000.0
            }
        })
    }

    #[test]
    fn test_events_for_other_titles_are_ignored() {
        let store = store();
        let mut ingestor = PlayerEventIngestor::new(store.clone(), key());
        let t0 = Instant::now();

        assert!(ingestor.handle_message(&tagged_pause("550", "movie", 600.0), t0).is_none());
        assert!(ingestor.handle_message(&tagged_pause("1399", "movie", 600.0), t0).is_none());
        assert!(store.read_all().is_empty());

        assert!(ingestor.handle_message(&tagged_pause("1399", "tv", 600.0), t0).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_keep_progress_apart() {
        let store = store();
        let bus = PlayerMessageBus::new();
        let movie = ProgressKey::new(TitleId(550), MediaKind::Movie);

        let _movie_session = IngestSession::start(store.clone(), &bus, movie);
        let _series_session = IngestSession::start(store.clone(), &bus, key());
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(tagged_pause("550", "movie", 600.0)), 2);

        let watched = store.clone();
        assert!(wait_for(move || watched.get(TitleId(550), MediaKind::Movie).is_some()).await);
        // Give the other session time to (wrongly) write as well
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = store.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key(), movie);
        assert_eq!(records[0].position_seconds, 600.0);
    }

    #[tokio::test]
    async fn test_inbox_delivers_to_one_session() {
        let store = store();
        let bus = PlayerMessageBus::new();
        let movie = ProgressKey::new(TitleId(550), MediaKind::Movie);

        let movie_session = IngestSession::start(store.clone(), &bus, movie);
        let _series_session = IngestSession::start(store.clone(), &bus, key());

        // Untagged event: only the addressed session may save it
        assert!(movie_session.deliver(event("pause", 900.0)));

        let watched = store.clone();
        assert!(wait_for(move || watched.get(TitleId(550), MediaKind::Movie).is_some()).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get(TitleId(1399), MediaKind::Series).is_none());
    }

    #[tokio::test]
    async fn test_idle_session_closes_and_releases_bus() {
        let store = store();
        let bus = PlayerMessageBus::new();

        let session =
            IngestSession::start_with_idle_timeout(store.clone(), &bus, key(), Duration::from_millis(100));
        assert_eq!(bus.subscriber_count(), 1);

        // Noise does not keep a session alive
        bus.publish(json!("heartbeat from another frame"));

        let watched = bus.clone();
        assert!(wait_for(move || watched.subscriber_count() == 0).await);
        assert!(session.is_finished());
        assert!(!session.deliver(event("pause", 900.0)));

        bus.publish(event("pause", 900.0));
        assert!(store.read_all().is_empty());
    }

    #[tokio::test]
    async fn test_recognized_events_extend_idle_deadline() {
        let store = store();
        let bus = PlayerMessageBus::new();

        let session =
            IngestSession::start_with_idle_timeout(store.clone(), &bus, key(), Duration::from_millis(300));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            bus.publish(event("play", 10.0));
        }

        // 600ms in, well past the original deadline
        assert!(!session.is_finished());
        assert_eq!(bus.subscriber_count(), 1);
    }
}
