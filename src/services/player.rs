use crate::models::{MediaKind, ProgressKey};

/// Embed URL for the third-party player
///
/// Series always open on S1 E1; the player's own episode selector takes it from there.
pub fn embed_url(base_url: &str, key: ProgressKey) -> String {
    let base = base_url.trim_end_matches('/');
    match key.media_kind {
        MediaKind::Movie => format!("{}/movie/{}", base, key.title_id),
        MediaKind::Series => format!(
            "{}/tv/{}/1/1?autoPlay=true&nextEpisode=true&episodeSelector=true",
            base, key.title_id
        ),
    }
}
