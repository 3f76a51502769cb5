/// TMDB (The Movie Database) API provider
///
/// Authenticates with a v4 read access token sent as a bearer header.
///
/// Endpoints used:
/// - `/{movie|tv}/{id}` for Continue Watching cards and season counts
/// - `/{movie|tv}/{id}?append_to_response=videos,recommendations` for detail views
/// - `/{movie|tv}/{id}/credits`
/// - `/search/{movie|tv}` and `/discover/{movie|tv}` for listings
use std::time::Duration;

use reqwest::{header::ACCEPT, Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    error::{AppError, AppResult},
    models::{Credits, MediaKind, Paged, TitleId, TmdbTitle},
    services::providers::MetadataProvider,
};

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_token: String,
    api_url: String,
}

impl TmdbProvider {
    pub fn new(api_token: String, api_url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_token,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let url = format!("{}/{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(path.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                path = %path,
                status = %status,
                body = %body,
                "TMDB request failed"
            );
            return Err(AppError::ExternalApi(format!(
                "TMDB API returned status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(path = %path, error = %e, "Failed to deserialize TMDB response");
            AppError::ExternalApi(format!("Failed to parse TMDB response: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbProvider {
    async fn fetch_title(&self, title_id: TitleId, kind: MediaKind) -> AppResult<TmdbTitle> {
        let path = format!("{}/{}", kind.as_path(), title_id);
        let title: TmdbTitle = self.get_json(&path, &[]).await?;

        tracing::debug!(title_id = %title_id, kind = %kind, provider = "tmdb", "Title fetched");
        Ok(title)
    }

    async fn fetch_details(&self, title_id: TitleId, kind: MediaKind) -> AppResult<TmdbTitle> {
        let path = format!("{}/{}", kind.as_path(), title_id);
        self.get_json(&path, &[("append_to_response", "videos,recommendations")])
            .await
    }

    async fn fetch_credits(&self, title_id: TitleId, kind: MediaKind) -> AppResult<Credits> {
        let path = format!("{}/{}/credits", kind.as_path(), title_id);
        self.get_json(&path, &[]).await
    }

    async fn search_titles(&self, query: &str, kind: MediaKind) -> AppResult<Vec<TmdbTitle>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        let path = format!("search/{}", kind.as_path());
        let page: Paged<TmdbTitle> = self.get_json(&path, &[("query", query)]).await?;

        tracing::info!(
            query = %query,
            results = page.results.len(),
            provider = "tmdb",
            "Title search completed"
        );

        Ok(page.results)
    }

    async fn discover_titles(&self, kind: MediaKind) -> AppResult<Vec<TmdbTitle>> {
        let path = format!("discover/{}", kind.as_path());
        let page: Paged<TmdbTitle> = self
            .get_json(&path, &[("sort_by", "popularity.desc")])
            .await?;
        Ok(page.results)
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
