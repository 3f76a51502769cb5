use serde::Serialize;

use crate::{
    error::AppResult,
    models::{CastMember, MediaKind, ProgressKey, SearchResult, TitleId, TitleMetadata},
    services::{
        player::embed_url,
        providers::MetadataProvider,
        resume::{ResumeDecision, ResumeResolver},
    },
};

/// Number of cast members shown on a detail page
pub const CAST_LIMIT: usize = 10;

/// Everything a detail view renders for one title
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleDetails {
    pub metadata: TitleMetadata,
    pub year: Option<i32>,
    pub runtime_label: Option<String>,
    pub cast: Vec<CastMember>,
    pub trailer_key: Option<String>,
    pub recommendations: Vec<SearchResult>,
    pub resume: ResumeDecision,
    pub embed_url: String,
}

/// Loads a detail view: primary record and credits are fetched concurrently
///
/// Only a failed primary fetch is an error; without credits the page renders with an
/// empty cast.
pub async fn load_title_details(
    provider: &dyn MetadataProvider,
    resolver: &ResumeResolver,
    player_base_url: &str,
    title_id: TitleId,
    kind: MediaKind,
) -> AppResult<TitleDetails> {
    let (details, credits) = tokio::join!(
        provider.fetch_details(title_id, kind),
        provider.fetch_credits(title_id, kind)
    );

    let mut details = details.map_err(|e| {
        tracing::error!(title_id = %title_id, kind = %kind, error = %e, "Error fetching details");
        e
    })?;

    let cast = match credits {
        Ok(credits) => credits.cast.into_iter().take(CAST_LIMIT).collect(),
        Err(e) => {
            tracing::warn!(title_id = %title_id, kind = %kind, error = %e, "Credits unavailable");
            Vec::new()
        }
    };

    let trailer_key = details.videos.take().and_then(|videos| {
        videos
            .results
            .into_iter()
            .find(|v| v.site == "YouTube" && v.video_type == "Trailer")
            .map(|v| v.key)
    });

    let recommendations = details
        .recommendations
        .take()
        .map(|page| {
            page.results
                .into_iter()
                .map(|raw| SearchResult::from_tmdb(kind, raw))
                .collect()
        })
        .unwrap_or_default();

    let metadata = TitleMetadata::from_tmdb(kind, details);
    let resume = resolver.resolve_async(title_id, kind).await;

    Ok(TitleDetails {
        year: metadata.year(),
        runtime_label: metadata.runtime_label(),
        metadata,
        cast,
        trailer_key,
        recommendations,
        resume,
        embed_url: embed_url(player_base_url, ProgressKey::new(title_id, kind)),
    })
}
