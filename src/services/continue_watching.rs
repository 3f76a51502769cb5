use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::{
    models::ProgressKey,
    services::{
        progress_store::ProgressStore,
        reconciler::{ContinueWatchingItem, MetadataMap, MetadataReconciler},
    },
};

struct CachedMetadata {
    keys: HashSet<ProgressKey>,
    metadata: MetadataMap,
}

/// The "Continue Watching" row: stored progress reconciled against live metadata
///
/// Metadata is only refetched when the set of stored keys changes. Progress values are
/// always read fresh from the store.
pub struct ContinueWatchingFeed {
    store: ProgressStore,
    reconciler: MetadataReconciler,
    image_base_url: String,
    generation: AtomicU64,
    cache: Mutex<Option<CachedMetadata>>,
}

impl ContinueWatchingFeed {
    pub fn new(store: ProgressStore, reconciler: MetadataReconciler, image_base_url: String) -> Self {
        Self {
            store,
            reconciler,
            image_base_url,
            generation: AtomicU64::new(0),
            cache: Mutex::new(None),
        }
    }

    pub async fn load(&self) -> Vec<ContinueWatchingItem> {
        let records = self
            .store
            .run_blocking(|store| store.read_all())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Error reading watch progress for feed");
                Vec::new()
            });
        let keys: HashSet<ProgressKey> = records.iter().map(|r| r.key()).collect();

        let cached = {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache
                .as_ref()
                .filter(|c| c.keys == keys)
                .map(|c| c.metadata.clone())
        };

        let metadata = match cached {
            Some(metadata) => metadata,
            None => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let fetched = self
                    .reconciler
                    .fetch_all(records.iter().map(|r| r.key()))
                    .await;

                if self.generation.load(Ordering::SeqCst) == generation {
                    let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                    *cache = Some(CachedMetadata {
                        keys,
                        metadata: fetched.clone(),
                    });
                } else {
                    tracing::debug!(generation, "Discarding superseded metadata refresh");
                }
                fetched
            }
        };

        MetadataReconciler::merge(records, &metadata, &self.image_base_url)
    }

    /// Drops cached metadata and reloads, retrying entries that failed before
    pub async fn refresh(&self) -> Vec<ContinueWatchingItem> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.load().await
    }
}
