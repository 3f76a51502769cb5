use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    models::{MediaKind, ProgressKey, ProgressRecord, TitleId},
    storage::{StorageBackend, StorageKey},
};

/// Maximum number of titles kept for "Continue Watching"
pub const WATCH_PROGRESS_CAPACITY: usize = 20;

/// At or below this percent a title is not worth resuming
pub const MIN_RESUMABLE_PERCENT: f64 = 1.0;

/// At or above this percent a title counts as finished
pub const FINISHED_PERCENT: f64 = 95.0;

/// Records not written for this long are dropped on the next read (30 days)
pub const PROGRESS_MAX_AGE_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Source of "now" in epoch millis
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

/// Bounded, ordered set of progress records persisted under a single storage key
///
/// Every mutation is a read-modify-persist of the whole set under one lock, so two
/// writers (an ingest session and a user removal, say) cannot lose each other's update.
/// Storage faults are logged and swallowed: reads degrade to empty, writes to no-ops.
#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn StorageBackend>,
    key: StorageKey,
    clock: Clock,
    write_lock: Arc<Mutex<()>>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_clock(backend, system_clock())
    }

    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Clock) -> Self {
        Self {
            backend,
            key: StorageKey::WatchProgress,
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn now_millis(&self) -> i64 {
        (self.clock)()
    }

    /// Runs `f` against the store on tokio's blocking pool
    ///
    /// Store operations do synchronous file I/O under a lock; async callers go
    /// through here instead of calling them on a runtime worker.
    pub async fn run_blocking<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&ProgressStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| AppError::Internal(format!("Progress store task failed: {}", e)))
    }

    /// All records, most recently watched first
    ///
    /// Expired records are purged here rather than on a timer.
    pub fn read_all(&self) -> Vec<ProgressRecord> {
        let _guard = self.lock();
        let mut records = self.load();
        if Self::retain_fresh(&mut records, self.now_millis(), PROGRESS_MAX_AGE_MILLIS) > 0 {
            self.persist(&records);
        }
        records
    }

    pub fn get(&self, title_id: TitleId, media_kind: MediaKind) -> Option<ProgressRecord> {
        let key = ProgressKey::new(title_id, media_kind);
        self.read_all().into_iter().find(|r| r.key() == key)
    }

    /// Upserts `record` by (title, kind)
    ///
    /// Progress at or below [`MIN_RESUMABLE_PERCENT`] is ignored; progress at or above
    /// [`FINISHED_PERCENT`] removes the title instead. `last_watched_at` is overwritten
    /// with the store clock.
    pub fn write(&self, mut record: ProgressRecord) {
        let key = record.key();
        let percent = record.percent_complete;

        if !percent.is_finite() || percent <= MIN_RESUMABLE_PERCENT {
            tracing::debug!(key = %key, percent, "Progress below resume threshold, not saved");
            return;
        }

        if percent >= FINISHED_PERCENT {
            tracing::debug!(key = %key, percent, "Title finished, dropping progress");
            self.remove(key.title_id, key.media_kind);
            return;
        }

        let _guard = self.lock();
        let mut records = self.load();

        record.last_watched_at = self.now_millis();
        records.retain(|r| r.key() != key);
        records.insert(0, record);
        // Stable sort: on equal timestamps the record just written stays ahead
        records.sort_by(|a, b| b.last_watched_at.cmp(&a.last_watched_at));

        while records.len() > WATCH_PROGRESS_CAPACITY {
            let Some(oldest) = records.iter().rposition(|r| r.key() != key) else {
                break;
            };
            let evicted = records.remove(oldest);
            tracing::debug!(evicted = %evicted.key(), "Evicted oldest progress record");
        }

        self.persist(&records);
        tracing::debug!(key = %key, percent, total = records.len(), "Saved watch progress");
    }

    pub fn remove(&self, title_id: TitleId, media_kind: MediaKind) {
        let key = ProgressKey::new(title_id, media_kind);
        let _guard = self.lock();
        let mut records = self.load();

        let before = records.len();
        records.retain(|r| r.key() != key);
        if records.len() != before {
            self.persist(&records);
            tracing::info!(key = %key, "Removed watch progress");
        }
    }

    /// Drops records last written more than `max_age_millis` ago
    ///
    /// Only touches storage when something was removed. Returns the number removed.
    pub fn remove_expired(&self, max_age_millis: i64) -> usize {
        let _guard = self.lock();
        let mut records = self.load();

        let removed = Self::retain_fresh(&mut records, self.now_millis(), max_age_millis);
        if removed > 0 {
            self.persist(&records);
        }
        removed
    }

    pub fn clear(&self) {
        let _guard = self.lock();
        if let Err(e) = self.backend.remove(&self.key) {
            tracing::error!(error = %e, "Error clearing watch progress");
        } else {
            tracing::info!("Cleared all watch progress");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retain_fresh(records: &mut Vec<ProgressRecord>, now: i64, max_age_millis: i64) -> usize {
        let cutoff = now - max_age_millis;
        let before = records.len();
        records.retain(|r| r.last_watched_at > cutoff);

        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(removed, "Purged expired watch progress");
        }
        removed
    }

    /// Loads the persisted set, skipping records that no longer parse
    fn load(&self) -> Vec<ProgressRecord> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "Error reading watch progress");
                return Vec::new();
            }
        };

        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "Stored watch progress is corrupt, ignoring it");
                return Vec::new();
            }
        };

        let mut records: Vec<ProgressRecord> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable progress record");
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| b.last_watched_at.cmp(&a.last_watched_at));
        let mut seen = std::collections::HashSet::new();
        records.retain(|r| seen.insert(r.key()));
        records
    }

    fn persist(&self, records: &[ProgressRecord]) {
        if let Err(e) = self.try_persist(records) {
            tracing::error!(error = %e, "Error saving watch progress");
        }
    }

    fn try_persist(&self, records: &[ProgressRecord]) -> AppResult<()> {
        let json = serde_json::to_string(records)?;
        self.backend.set(&self.key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::Map;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

    struct TestClock(Arc<AtomicI64>);

    impl TestClock {
        fn set(&self, millis: i64) {
            self.0.store(millis, Ordering::SeqCst);
        }
    }

    fn store_at(start: i64) -> (ProgressStore, TestClock, Arc<MemoryStorage>) {
        let now = Arc::new(AtomicI64::new(start));
        let reader = now.clone();
        let backend = Arc::new(MemoryStorage::new());
        let store = ProgressStore::with_clock(
            backend.clone(),
            Arc::new(move || reader.load(Ordering::SeqCst)),
        );
        (store, TestClock(now), backend)
    }

    fn record(id: u64, kind: MediaKind, percent: f64) -> ProgressRecord {
        ProgressRecord {
            title_id: TitleId(id),
            media_kind: kind,
            position_seconds: percent * 60.0,
            total_seconds: 6000.0,
            percent_complete: percent,
            season_number: None,
            episode_number: None,
            event_timestamp: 1,
            last_watched_at: 0,
            extra: Map::new(),
        }
    }

    fn ids(store: &ProgressStore) -> Vec<u64> {
        store.read_all().iter().map(|r| r.title_id.0).collect()
    }

    #[test]
    fn test_write_then_get_round_trip() {
        let (store, _clock, _) = store_at(1_000_000);
        let mut written = record(550, MediaKind::Series, 42.7);
        written.season_number = Some(2);
        written.episode_number = Some(4);

        store.write(written.clone());
        let read = store.get(TitleId(550), MediaKind::Series).unwrap();

        assert_eq!(read.last_watched_at, 1_000_000);
        written.last_watched_at = read.last_watched_at;
        assert_eq!(read, written);
    }

    #[test]
    fn test_kind_disambiguates_ids() {
        let (store, _clock, _) = store_at(1_000_000);
        store.write(record(1, MediaKind::Movie, 10.0));
        store.write(record(1, MediaKind::Series, 20.0));

        assert_eq!(store.read_all().len(), 2);
        assert_eq!(
            store.get(TitleId(1), MediaKind::Movie).unwrap().percent_complete,
            10.0
        );
    }

    #[test]
    fn test_below_threshold_is_noop() {
        let (store, _clock, backend) = store_at(1_000_000);
        store.write(record(1, MediaKind::Movie, 0.5));
        store.write(record(2, MediaKind::Movie, 1.0));

        assert!(store.read_all().is_empty());
        assert_eq!(backend.get(&StorageKey::WatchProgress).unwrap(), None);
    }

    #[test]
    fn test_nan_progress_is_noop() {
        let (store, _clock, _) = store_at(1_000_000);
        store.write(record(1, MediaKind::Movie, f64::NAN));
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn test_finished_removes_existing_record() {
        let (store, _clock, _) = store_at(1_000_000);
        store.write(record(7, MediaKind::Movie, 50.0));
        store.write(record(8, MediaKind::Movie, 50.0));

        store.write(record(7, MediaKind::Movie, 97.0));
        assert_eq!(ids(&store), vec![8]);

        store.write(record(8, MediaKind::Movie, 95.0));
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn test_upsert_replaces_and_moves_to_front() {
        let (store, clock, _) = store_at(1_000);
        store.write(record(1, MediaKind::Movie, 10.0));
        clock.set(2_000);
        store.write(record(2, MediaKind::Movie, 10.0));
        clock.set(3_000);
        store.write(record(1, MediaKind::Movie, 30.0));

        let records = store.read_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title_id, TitleId(1));
        assert_eq!(records[0].percent_complete, 30.0);
        assert_eq!(records[0].last_watched_at, 3_000);
    }

    #[test]
    fn test_twenty_first_write_evicts_oldest() {
        let (store, clock, _) = store_at(0);
        for id in 1..=21 {
            clock.set(1_000 + id as i64);
            store.write(record(id, MediaKind::Movie, 50.0));
        }

        let kept = ids(&store);
        assert_eq!(kept.len(), WATCH_PROGRESS_CAPACITY);
        assert!(!kept.contains(&1));
        assert_eq!(kept.first(), Some(&21));
        assert_eq!(kept.last(), Some(&2));
    }

    #[test]
    fn test_incoming_oldest_record_is_kept() {
        let (store, clock, _) = store_at(0);
        for id in 1..=20 {
            clock.set(10_000 + id as i64);
            store.write(record(id, MediaKind::Movie, 50.0));
        }

        // Clock went backwards: the new record is the globally oldest
        clock.set(500);
        store.write(record(99, MediaKind::Series, 50.0));

        let kept = ids(&store);
        assert_eq!(kept.len(), WATCH_PROGRESS_CAPACITY);
        assert!(kept.contains(&99));
        assert!(!kept.contains(&1));
    }

    #[test]
    fn test_timestamp_tie_keeps_incoming() {
        let (store, _clock, _) = store_at(5_000);
        for id in 1..=21 {
            store.write(record(id, MediaKind::Movie, 50.0));
        }

        let kept = ids(&store);
        assert_eq!(kept.len(), WATCH_PROGRESS_CAPACITY);
        assert_eq!(kept[0], 21);
    }

    #[test]
    fn test_never_exceeds_cap_or_duplicates() {
        let (store, clock, _) = store_at(0);
        let mut tick = 0;
        for round in 0..5u64 {
            for id in 0..30u64 {
                tick += 1;
                // Scramble the order and occasionally move the clock backwards
                clock.set(if tick % 7 == 0 { tick - 5 } else { tick } * 10);
                let kind = if (id + round) % 2 == 0 {
                    MediaKind::Movie
                } else {
                    MediaKind::Series
                };
                store.write(record((id * 13 + round) % 30, kind, 50.0));

                let records = store.read_all();
                assert!(records.len() <= WATCH_PROGRESS_CAPACITY);
                let mut keys: Vec<_> = records.iter().map(|r| r.key()).collect();
                let total = keys.len();
                keys.sort_by_key(|k| (k.title_id, k.media_kind.as_path()));
                keys.dedup();
                assert_eq!(keys.len(), total);
                assert!(records
                    .windows(2)
                    .all(|w| w[0].last_watched_at >= w[1].last_watched_at));
            }
        }
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _clock, _) = store_at(1_000);
        store.write(record(1, MediaKind::Movie, 10.0));
        store.write(record(2, MediaKind::Movie, 10.0));

        store.remove(TitleId(1), MediaKind::Movie);
        store.remove(TitleId(404), MediaKind::Movie);
        assert_eq!(ids(&store), vec![2]);

        store.clear();
        assert!(store.read_all().is_empty());
    }

    /// Counts `set` calls to verify redundant writes are skipped
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        sets: AtomicUsize,
    }

    impl StorageBackend for CountingStorage {
        fn get(&self, key: &StorageKey) -> AppResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &StorageKey, value: &str) -> AppResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn remove(&self, key: &StorageKey) -> AppResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_remove_expired_cutoff() {
        let now = 100 * DAY_MILLIS;
        let clock = Arc::new(AtomicI64::new(now - 31 * DAY_MILLIS));
        let reader = clock.clone();
        let backend = Arc::new(CountingStorage::default());
        let store = ProgressStore::with_clock(
            backend.clone(),
            Arc::new(move || reader.load(Ordering::SeqCst)),
        );

        store.write(record(1, MediaKind::Movie, 10.0));
        clock.store(now - 29 * DAY_MILLIS, Ordering::SeqCst);
        store.write(record(2, MediaKind::Movie, 10.0));
        clock.store(now, Ordering::SeqCst);

        let sets_before = backend.sets.load(Ordering::SeqCst);
        assert_eq!(store.remove_expired(PROGRESS_MAX_AGE_MILLIS), 1);
        assert_eq!(backend.sets.load(Ordering::SeqCst), sets_before + 1);

        // Nothing left to purge: no write
        assert_eq!(store.remove_expired(PROGRESS_MAX_AGE_MILLIS), 0);
        assert_eq!(backend.sets.load(Ordering::SeqCst), sets_before + 1);

        assert_eq!(ids(&store), vec![2]);
    }

    #[test]
    fn test_read_purges_expired_lazily() {
        let (store, clock, backend) = store_at(DAY_MILLIS);
        store.write(record(1, MediaKind::Movie, 10.0));

        // Still on disk until somebody reads
        clock.set(40 * DAY_MILLIS);
        let raw = backend.get(&StorageKey::WatchProgress).unwrap().unwrap();
        assert!(raw.contains("\"id\":1"));

        assert!(store.get(TitleId(1), MediaKind::Movie).is_none());
        let raw = backend.get(&StorageKey::WatchProgress).unwrap().unwrap();
        assert_eq!(raw, "[]");
    }

    #[test]
    fn test_corrupt_storage_reads_empty() {
        let (store, _clock, backend) = store_at(1_000);
        backend
            .set(&StorageKey::WatchProgress, "{not json")
            .unwrap();
        assert!(store.read_all().is_empty());

        // A later write replaces the corrupt value
        store.write(record(3, MediaKind::Movie, 10.0));
        assert_eq!(ids(&store), vec![3]);
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let (store, _clock, backend) = store_at(1_000);
        backend
            .set(
                &StorageKey::WatchProgress,
                r#"[{"garbage": true}, {"id": 5, "mediaType": "movie", "currentTime": 1, "duration": 10, "progress": 10, "timestamp": 1, "lastWatched": 900}]"#,
            )
            .unwrap();

        assert_eq!(ids(&store), vec![5]);
    }

    #[test]
    fn test_unknown_fields_survive_other_writes() {
        let (store, _clock, backend) = store_at(1_000);
        backend
            .set(
                &StorageKey::WatchProgress,
                r#"[{"id": "5", "mediaType": "tv", "currentTime": 1, "duration": 10, "progress": 10, "timestamp": 1, "lastWatched": 900, "provider": "vidking"}]"#,
            )
            .unwrap();

        store.write(record(6, MediaKind::Movie, 10.0));

        let kept = store.get(TitleId(5), MediaKind::Series).unwrap();
        assert_eq!(kept.extra.get("provider"), Some(&Value::from("vidking")));
    }

    struct BrokenStorage;

    impl StorageBackend for BrokenStorage {
        fn get(&self, _key: &StorageKey) -> AppResult<Option<String>> {
            Err(AppError::Storage(std::io::Error::other("disk unavailable")))
        }

        fn set(&self, _key: &StorageKey, _value: &str) -> AppResult<()> {
            Err(AppError::Storage(std::io::Error::other("disk unavailable")))
        }

        fn remove(&self, _key: &StorageKey) -> AppResult<()> {
            Err(AppError::Storage(std::io::Error::other("disk unavailable")))
        }
    }

    #[test]
    fn test_storage_faults_never_escape() {
        let store = ProgressStore::new(Arc::new(BrokenStorage));

        store.write(record(1, MediaKind::Movie, 10.0));
        store.remove(TitleId(1), MediaKind::Movie);
        store.clear();
        assert_eq!(store.remove_expired(PROGRESS_MAX_AGE_MILLIS), 0);
        assert!(store.read_all().is_empty());
        assert!(store.get(TitleId(1), MediaKind::Movie).is_none());
    }

    #[tokio::test]
    async fn test_run_blocking_reaches_store() {
        let store = ProgressStore::new(Arc::new(MemoryStorage::new()));

        let saved = store
            .run_blocking(|s| {
                s.write(record(1, MediaKind::Movie, 10.0));
                s.get(TitleId(1), MediaKind::Movie)
            })
            .await
            .unwrap();

        assert!(saved.is_some());
        assert_eq!(store.read_all().len(), 1);
    }

    #[tokio::test]
    async fn test_run_blocking_panic_is_internal_error() {
        let store = ProgressStore::new(Arc::new(MemoryStorage::new()));

        let result = store
            .run_blocking(|_| -> usize { panic!("store closure panicked") })
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
