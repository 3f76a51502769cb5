/// Title metadata provider abstraction
///
/// All display metadata (posters, names, credits, listings) comes from an external API
/// this crate does not control. Providers only translate HTTP into model types; deciding
/// what a failure means for a view is left to the calling service.
use crate::{
    error::AppResult,
    models::{Credits, MediaKind, TitleId, TmdbTitle},
};

pub mod tmdb;

pub use tmdb::TmdbProvider;

/// Trait for title metadata providers
///
/// Every call is read-only and independent, so callers are free to issue them
/// concurrently from spawned tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch the base record for one title
    async fn fetch_title(&self, title_id: TitleId, kind: MediaKind) -> AppResult<TmdbTitle>;

    /// Fetch the full record for a detail view, including videos and recommendations
    async fn fetch_details(&self, title_id: TitleId, kind: MediaKind) -> AppResult<TmdbTitle>;

    /// Fetch cast and crew for one title
    async fn fetch_credits(&self, title_id: TitleId, kind: MediaKind) -> AppResult<Credits>;

    /// Search titles of one kind by name
    async fn search_titles(&self, query: &str, kind: MediaKind) -> AppResult<Vec<TmdbTitle>>;

    /// Popular titles of one kind, used when there is no search query
    async fn discover_titles(&self, kind: MediaKind) -> AppResult<Vec<TmdbTitle>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
