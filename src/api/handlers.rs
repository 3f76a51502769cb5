use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{MediaKind, ProgressKey, ProgressRecord, ProgressSample, SearchResult, TitleId},
    services::{
        details::{load_title_details, TitleDetails},
        player::embed_url,
        reconciler::ContinueWatchingItem,
        search, IngestSession, ResumeDecision,
    },
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    pub id: TitleId,
    pub media_type: MediaKind,
    #[serde(flatten)]
    pub sample: ProgressSample,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPlaybackRequest {
    pub id: TitleId,
    pub media_type: MediaKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResponse {
    pub session_id: Uuid,
    pub embed_url: String,
    pub resume: ResumeDecision,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(rename = "type", default = "default_search_kind")]
    pub kind: MediaKind,
}

fn default_search_kind() -> MediaKind {
    MediaKind::Movie
}

fn parse_key(kind: &str, id: &str) -> AppResult<ProgressKey> {
    let media_kind = kind
        .parse::<MediaKind>()
        .map_err(|_| AppError::InvalidInput(format!("Unknown media type: {}", kind)))?;
    let title_id = id
        .parse::<TitleId>()
        .map_err(|_| AppError::InvalidInput(format!("Invalid title id: {}", id)))?;
    Ok(ProgressKey::new(title_id, media_kind))
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

pub async fn list_progress(State(state): State<AppState>) -> AppResult<Json<Vec<ProgressRecord>>> {
    let records = state.store.run_blocking(|store| store.read_all()).await?;
    Ok(Json(records))
}

/// Saves a progress sample the way an ingested player event would be saved
///
/// Returns the stored record, or `null` when the sample fell outside the resumable
/// window (too little watched, or finished).
pub async fn save_progress(
    State(state): State<AppState>,
    Json(payload): Json<SaveProgressRequest>,
) -> AppResult<Json<Option<ProgressRecord>>> {
    let key = ProgressKey::new(payload.id, payload.media_type);
    let record = payload
        .sample
        .into_record(key, state.store.now_millis())
        .ok_or_else(|| {
            AppError::InvalidInput(
                "Progress needs a non-negative currentTime and a positive duration".to_string(),
            )
        })?;

    let stored = state
        .store
        .run_blocking(move |store| {
            store.write(record);
            store.get(key.title_id, key.media_kind)
        })
        .await?;
    Ok(Json(stored))
}

pub async fn clear_progress(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.store.run_blocking(|store| store.clear()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<ProgressRecord>> {
    let key = parse_key(&kind, &id)?;
    state
        .store
        .run_blocking(move |store| store.get(key.title_id, key.media_kind))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No progress for {}", key)))
}

pub async fn remove_progress(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let key = parse_key(&kind, &id)?;
    state
        .store
        .run_blocking(move |store| store.remove(key.title_id, key.media_kind))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<ResumeDecision>> {
    let key = parse_key(&kind, &id)?;
    Ok(Json(
        state
            .resolver
            .resolve_async(key.title_id, key.media_kind)
            .await,
    ))
}

pub async fn continue_watching(
    State(state): State<AppState>,
    Query(params): Query<FeedQuery>,
) -> Json<Vec<ContinueWatchingItem>> {
    let items = if params.refresh {
        state.feed.refresh().await
    } else {
        state.feed.load().await
    };
    Json(items)
}

/// Opens a playback view: subscribes an ingest session for the title
pub async fn start_playback(
    State(state): State<AppState>,
    Json(payload): Json<StartPlaybackRequest>,
) -> (StatusCode, Json<PlaybackResponse>) {
    let key = ProgressKey::new(payload.id, payload.media_type);
    state.prune_sessions().await;

    let session = IngestSession::start_with_idle_timeout(
        state.store.clone(),
        &state.bus,
        key,
        state.session_idle_timeout,
    );
    let session_id = Uuid::new_v4();

    state.inner.write().await.sessions.insert(session_id, session);
    tracing::info!(session_id = %session_id, key = %key, "Playback started");

    let response = PlaybackResponse {
        session_id,
        embed_url: embed_url(&state.player_base_url, key),
        resume: state
            .resolver
            .resolve_async(key.title_id, key.media_kind)
            .await,
    };

    (StatusCode::CREATED, Json(response))
}

pub async fn stop_playback(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let session = state
        .inner
        .write()
        .await
        .sessions
        .remove(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("Playback session {} not found", session_id)))?;

    session.stop();
    Ok(StatusCode::NO_CONTENT)
}

fn decode_player_message(body: String) -> Value {
    serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body))
}

/// Relays a raw message from an embedded player onto the message bus
///
/// Anything is accepted: string payloads that are not JSON are forwarded as strings and
/// left for the sessions to ignore. Each session only saves events tagged with its own
/// title (or untagged ones).
pub async fn post_player_message(State(state): State<AppState>, body: String) -> StatusCode {
    let delivered = state.bus.publish(decode_player_message(body));
    tracing::trace!(delivered, "Relayed player message");
    StatusCode::ACCEPTED
}

/// Hands a raw player message to one playback session only
pub async fn post_session_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    body: String,
) -> AppResult<StatusCode> {
    let inner = state.inner.read().await;
    let delivered = inner
        .sessions
        .get(&session_id)
        .is_some_and(|session| session.deliver(decode_player_message(body)));

    if delivered {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::NotFound(format!(
            "Playback session {} not found",
            session_id
        )))
    }
}

pub async fn title_details(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<TitleDetails>> {
    let key = parse_key(&kind, &id)?;
    let details = load_title_details(
        state.provider.as_ref(),
        &state.resolver,
        &state.player_base_url,
        key.title_id,
        key.media_kind,
    )
    .await?;
    Ok(Json(details))
}

pub async fn search_titles(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<Vec<SearchResult>>> {
    let results = search::search_titles(state.provider.clone(), &params.q, params.kind).await?;
    Ok(Json(results))
}
