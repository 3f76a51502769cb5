use serde::{Deserialize, Serialize};

use super::{MediaKind, TitleId};

// ============================================================================
// TMDB API Types
// ============================================================================

/// Movie or TV payload as returned by TMDB detail, search and discover endpoints
///
/// Movies and shows share one loose shape upstream; everything except `id` is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TmdbTitle {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub episode_run_time: Vec<u32>,
    #[serde(default)]
    pub number_of_seasons: Option<u32>,
    #[serde(default)]
    pub number_of_episodes: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    #[serde(default)]
    pub created_by: Vec<TmdbPerson>,
    #[serde(default)]
    pub videos: Option<TmdbVideos>,
    #[serde(default)]
    pub recommendations: Option<Paged<TmdbTitle>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbGenre {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbPerson {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TmdbVideos {
    #[serde(default)]
    pub results: Vec<TmdbVideo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbVideo {
    pub key: String,
    pub site: String,
    #[serde(rename = "type")]
    pub video_type: String,
}

/// Paged list wrapper used by search, discover and recommendations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paged<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Default for Paged<T> {
    fn default() -> Self {
        Self {
            page: 0,
            results: Vec::new(),
        }
    }
}

/// Credits response; only the cast is used
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CastMember {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

// ============================================================================
// Normalized metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieMetadata {
    pub id: TitleId,
    pub title: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub release_date: Option<String>,
    pub runtime_minutes: Option<u32>,
    pub vote_average: Option<f64>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesMetadata {
    pub id: TitleId,
    pub name: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub first_air_date: Option<String>,
    pub episode_runtime_minutes: Option<u32>,
    pub number_of_seasons: Option<u32>,
    pub number_of_episodes: Option<u32>,
    pub status: Option<String>,
    pub vote_average: Option<f64>,
    pub genres: Vec<String>,
    pub created_by: Vec<String>,
}

/// Display metadata for a title, resolved once from the loose upstream shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mediaType")]
pub enum TitleMetadata {
    #[serde(rename = "movie")]
    Movie(MovieMetadata),
    #[serde(rename = "tv")]
    Series(SeriesMetadata),
}

fn first_present(candidates: [&Option<String>; 4]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string())
}

impl TitleMetadata {
    pub fn from_tmdb(kind: MediaKind, raw: TmdbTitle) -> Self {
        let genres = raw.genres.into_iter().map(|g| g.name).collect();

        match kind {
            MediaKind::Movie => TitleMetadata::Movie(MovieMetadata {
                id: TitleId(raw.id),
                title: first_present([
                    &raw.title,
                    &raw.name,
                    &raw.original_name,
                    &raw.original_title,
                ]),
                poster_path: raw.poster_path,
                backdrop_path: raw.backdrop_path,
                overview: raw.overview,
                tagline: raw.tagline.filter(|t| !t.is_empty()),
                release_date: raw.release_date.filter(|d| !d.is_empty()),
                runtime_minutes: raw.runtime,
                vote_average: raw.vote_average,
                genres,
            }),
            MediaKind::Series => TitleMetadata::Series(SeriesMetadata {
                id: TitleId(raw.id),
                name: first_present([
                    &raw.name,
                    &raw.original_name,
                    &raw.title,
                    &raw.original_title,
                ]),
                poster_path: raw.poster_path,
                backdrop_path: raw.backdrop_path,
                overview: raw.overview,
                tagline: raw.tagline.filter(|t| !t.is_empty()),
                first_air_date: raw.first_air_date.filter(|d| !d.is_empty()),
                episode_runtime_minutes: raw.episode_run_time.first().copied(),
                number_of_seasons: raw.number_of_seasons,
                number_of_episodes: raw.number_of_episodes,
                status: raw.status,
                vote_average: raw.vote_average,
                genres,
                created_by: raw.created_by.into_iter().map(|p| p.name).collect(),
            }),
        }
    }

    pub fn id(&self) -> TitleId {
        match self {
            TitleMetadata::Movie(m) => m.id,
            TitleMetadata::Series(s) => s.id,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            TitleMetadata::Movie(_) => MediaKind::Movie,
            TitleMetadata::Series(_) => MediaKind::Series,
        }
    }

    pub fn display_title(&self) -> &str {
        match self {
            TitleMetadata::Movie(m) => &m.title,
            TitleMetadata::Series(s) => &s.name,
        }
    }

    pub fn poster_path(&self) -> Option<&str> {
        match self {
            TitleMetadata::Movie(m) => m.poster_path.as_deref(),
            TitleMetadata::Series(s) => s.poster_path.as_deref(),
        }
    }

    /// Full poster URL under `image_base`, if the title has a poster
    pub fn poster_url(&self, image_base: &str) -> Option<String> {
        self.poster_path()
            .map(|path| format!("{}{}", image_base.trim_end_matches('/'), path))
    }

    /// Release year for movies, first-air year for series
    pub fn year(&self) -> Option<i32> {
        let date = match self {
            TitleMetadata::Movie(m) => m.release_date.as_deref(),
            TitleMetadata::Series(s) => s.first_air_date.as_deref(),
        }?;
        date.get(..4)?.parse().ok()
    }

    pub fn runtime_label(&self) -> Option<String> {
        let minutes = match self {
            TitleMetadata::Movie(m) => m.runtime_minutes,
            TitleMetadata::Series(s) => s.episode_runtime_minutes,
        }?;
        format_runtime(minutes)
    }
}

/// Formats a runtime in minutes as `2h 5m`, `2h` or `45m`
pub fn format_runtime(minutes: u32) -> Option<String> {
    if minutes == 0 {
        return None;
    }

    let hours = minutes / 60;
    let rest = minutes % 60;
    Some(match (hours, rest) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    })
}

/// One row of a search or discover listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: TitleId,
    pub media_type: MediaKind,
    pub display_title: String,
    pub poster_path: Option<String>,
    pub vote_average: Option<f64>,
    pub year: Option<i32>,
    pub original_language: Option<String>,
    pub number_of_seasons: Option<u32>,
}

impl SearchResult {
    pub fn from_tmdb(kind: MediaKind, raw: TmdbTitle) -> Self {
        let original_language = raw.original_language.clone();
        let number_of_seasons = raw.number_of_seasons;
        let metadata = TitleMetadata::from_tmdb(kind, raw);

        Self {
            id: metadata.id(),
            media_type: kind,
            display_title: metadata.display_title().to_string(),
            poster_path: metadata.poster_path().map(str::to_string),
            vote_average: match &metadata {
                TitleMetadata::Movie(m) => m.vote_average,
                TitleMetadata::Series(s) => s.vote_average,
            },
            year: metadata.year(),
            original_language,
            number_of_seasons,
        }
    }
}
