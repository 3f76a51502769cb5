use serde::Serialize;

use crate::{
    models::{MediaKind, TitleId},
    services::progress_store::ProgressStore,
};

pub const WATCH_NOW_LABEL: &str = "Watch Now";

/// Primary action for a detail or playback view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDecision {
    pub has_progress: bool,
    pub resume_from_seconds: f64,
    pub percent_complete: Option<f64>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub action_label: String,
    /// e.g. `Last watched: Season 2, Episode 4`
    pub summary: Option<String>,
}

impl ResumeDecision {
    pub fn start_fresh() -> Self {
        Self {
            has_progress: false,
            resume_from_seconds: 0.0,
            percent_complete: None,
            season_number: None,
            episode_number: None,
            action_label: WATCH_NOW_LABEL.to_string(),
            summary: None,
        }
    }
}

/// Read-only view over the store answering "start or resume?"
#[derive(Clone)]
pub struct ResumeResolver {
    store: ProgressStore,
}

impl ResumeResolver {
    pub fn new(store: ProgressStore) -> Self {
        Self { store }
    }

    pub fn resolve(&self, title_id: TitleId, media_kind: MediaKind) -> ResumeDecision {
        Self::decide(&self.store, title_id, media_kind)
    }

    /// [`ResumeResolver::resolve`] for async callers; the store read runs off the runtime
    ///
    /// A failed read is treated like missing progress.
    pub async fn resolve_async(&self, title_id: TitleId, media_kind: MediaKind) -> ResumeDecision {
        self.store
            .run_blocking(move |store| Self::decide(store, title_id, media_kind))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(title_id = %title_id, error = %e, "Error resolving resume point");
                ResumeDecision::start_fresh()
            })
    }

    fn decide(store: &ProgressStore, title_id: TitleId, media_kind: MediaKind) -> ResumeDecision {
        let Some(record) = store
            .get(title_id, media_kind)
            .filter(|r| r.percent_complete > 0.0)
        else {
            return ResumeDecision::start_fresh();
        };

        let summary = match (record.season_number, record.episode_number) {
            (Some(season), Some(episode)) => Some(format!(
                "Last watched: Season {}, Episode {}",
                season, episode
            )),
            _ => None,
        };

        ResumeDecision {
            has_progress: true,
            resume_from_seconds: record.position_seconds,
            percent_complete: Some(record.percent_complete),
            season_number: record.season_number,
            episode_number: record.episode_number,
            action_label: format!("Resume ({}%)", record.percent_complete.round() as i64),
            summary,
        }
    }
}
