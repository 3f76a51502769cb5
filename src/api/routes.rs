use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Progress store
        .route(
            "/progress",
            get(handlers::list_progress)
                .post(handlers::save_progress)
                .delete(handlers::clear_progress),
        )
        .route(
            "/progress/:kind/:id",
            get(handlers::get_progress).delete(handlers::remove_progress),
        )
        .route("/resume/:kind/:id", get(handlers::resume))
        .route("/continue-watching", get(handlers::continue_watching))
        // Playback
        .route("/playback", post(handlers::start_playback))
        .route("/playback/:session_id", delete(handlers::stop_playback))
        .route(
            "/playback/:session_id/messages",
            post(handlers::post_session_message),
        )
        .route("/player/messages", post(handlers::post_player_message))
        // Titles
        .route("/titles/search", get(handlers::search_titles))
        .route("/titles/:kind/:id", get(handlers::title_details))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
