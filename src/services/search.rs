use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{MediaKind, SearchResult, TitleId, TmdbTitle},
    services::providers::MetadataProvider,
};

/// Service function for the browse/search listing
///
/// A blank query lists popular titles instead. Series listings are enriched with
/// season counts, fetched per show; a show whose lookup fails is listed unchanged.
pub async fn search_titles(
    provider: Arc<dyn MetadataProvider>,
    query: &str,
    kind: MediaKind,
) -> AppResult<Vec<SearchResult>> {
    let query = query.trim();
    let mut titles = if query.is_empty() {
        provider.discover_titles(kind).await?
    } else {
        provider.search_titles(query, kind).await?
    };

    if kind == MediaKind::Series && !titles.is_empty() {
        titles = enrich_season_counts(provider, titles).await;
    }

    Ok(titles
        .into_iter()
        .map(|raw| SearchResult::from_tmdb(kind, raw))
        .collect())
}

async fn enrich_season_counts(
    provider: Arc<dyn MetadataProvider>,
    shows: Vec<TmdbTitle>,
) -> Vec<TmdbTitle> {
    let tasks: Vec<_> = shows
        .iter()
        .map(|show| {
            let provider = provider.clone();
            let id = TitleId(show.id);
            tokio::spawn(async move { provider.fetch_title(id, MediaKind::Series).await })
        })
        .collect();

    let mut enriched = Vec::with_capacity(shows.len());
    for (mut show, task) in shows.into_iter().zip(tasks) {
        match task.await {
            Ok(Ok(details)) => show.number_of_seasons = details.number_of_seasons,
            Ok(Err(e)) => {
                tracing::warn!(title_id = show.id, error = %e, "Error fetching TV details");
            }
            Err(e) => {
                tracing::error!(title_id = show.id, error = %e, "TV details task join error");
            }
        }
        enriched.push(show);
    }
    enriched
}
