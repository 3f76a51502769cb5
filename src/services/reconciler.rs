use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    error::AppResult,
    models::{MediaKind, ProgressKey, ProgressRecord, TitleMetadata},
    services::providers::MetadataProvider,
};

/// Metadata per progress key; `None` marks "metadata unavailable"
pub type MetadataMap = HashMap<ProgressKey, Option<TitleMetadata>>;

/// One "Continue Watching" entry: stored progress plus whatever metadata could be fetched
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueWatchingItem {
    pub progress: ProgressRecord,
    pub metadata: Option<TitleMetadata>,
    pub display: Option<CardDisplay>,
}

impl ContinueWatchingItem {
    pub fn metadata_available(&self) -> bool {
        self.metadata.is_some()
    }
}

/// Pre-rendered strings for a Continue Watching card
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDisplay {
    pub title: String,
    pub poster_url: Option<String>,
    /// `S2 E5`, series only
    pub episode_label: Option<String>,
    /// `1h 12m left • 42%`
    pub time_info: String,
}

impl CardDisplay {
    fn build(record: &ProgressRecord, metadata: &TitleMetadata, image_base: &str) -> Self {
        let episode_label = match (
            record.media_kind,
            record.season_number,
            record.episode_number,
        ) {
            (MediaKind::Series, Some(season), Some(episode)) => {
                Some(format!("S{} E{}", season, episode))
            }
            _ => None,
        };

        Self {
            title: metadata.display_title().to_string(),
            poster_url: metadata.poster_url(image_base),
            episode_label,
            time_info: format!(
                "{} left • {}%",
                format_time_left(record.remaining_seconds()),
                record.percent_complete.floor() as i64
            ),
        }
    }
}

/// `1h 5m` above an hour, `42m` below
pub fn format_time_left(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// In-flight metadata fetches, aborted if the group is dropped before settling
struct FetchGroup {
    tasks: Vec<(ProgressKey, JoinHandle<AppResult<TitleMetadata>>)>,
}

impl FetchGroup {
    /// Waits for every fetch; failures become `None` rather than ending the wait
    async fn settle(mut self) -> MetadataMap {
        let mut settled = HashMap::with_capacity(self.tasks.len());
        let mut failures = 0;

        for (key, handle) in self.tasks.iter_mut() {
            let outcome = match handle.await {
                Ok(Ok(metadata)) => Some(metadata),
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Metadata fetch failed");
                    failures += 1;
                    None
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Metadata task join error");
                    failures += 1;
                    None
                }
            };
            settled.insert(*key, outcome);
        }

        if failures > 0 {
            tracing::warn!(
                success_count = settled.len() - failures,
                error_count = failures,
                "Partial metadata fetch failure"
            );
        }

        settled
    }
}

impl Drop for FetchGroup {
    fn drop(&mut self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

/// Joins stored progress with live metadata from the provider
#[derive(Clone)]
pub struct MetadataReconciler {
    provider: Arc<dyn MetadataProvider>,
}

impl MetadataReconciler {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    /// Fetches metadata for each distinct key concurrently
    ///
    /// Completes once every request has settled. A failed request yields `None` for its
    /// key and has no effect on the others. Dropping the returned future aborts the
    /// requests still in flight.
    pub async fn fetch_all(&self, keys: impl IntoIterator<Item = ProgressKey>) -> MetadataMap {
        let mut seen = HashSet::new();
        let mut group = FetchGroup { tasks: Vec::new() };

        for key in keys {
            if !seen.insert(key) {
                continue;
            }

            let provider = self.provider.clone();
            let task = tokio::spawn(async move {
                provider
                    .fetch_title(key.title_id, key.media_kind)
                    .await
                    .map(|raw| TitleMetadata::from_tmdb(key.media_kind, raw))
            });
            group.tasks.push((key, task));
        }

        tracing::debug!(
            requests = group.tasks.len(),
            provider = self.provider.name(),
            "Fetching metadata for progress keys"
        );

        group.settle().await
    }

    /// Pairs each record with its metadata, keeping the record order
    ///
    /// Records whose metadata is missing are kept, with `metadata` and `display` unset.
    pub fn merge(
        records: Vec<ProgressRecord>,
        metadata: &MetadataMap,
        image_base: &str,
    ) -> Vec<ContinueWatchingItem> {
        records
            .into_iter()
            .map(|record| {
                let metadata = metadata.get(&record.key()).cloned().flatten();
                let display = metadata
                    .as_ref()
                    .map(|m| CardDisplay::build(&record, m, image_base));
                ContinueWatchingItem {
                    progress: record,
                    metadata,
                    display,
                }
            })
            .collect()
    }
}
