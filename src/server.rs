//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let device_routes = Router::new()
        .route("/users/create", post(handlers::users_create))
        .route("/users/auth", get(handlers::users_auth))
        .route("/syncs/progress", put(handlers::progress_put))
        .route("/syncs/progress/{document}", get(handlers::progress_get))
        .route("/activity", post(handlers::activity_post))
        .route("/syncs/activity", post(handlers::activity_last_sync))
        .route("/documents", post(handlers::documents_push))
        .route("/syncs/documents", post(handlers::documents_reconcile))
        .route(
            "/documents/{id}/file",
            put(handlers::document_file_put)
                .get(handlers::document_file_get)
                .layer(DefaultBodyLimit::disable()),
        );

    let stats_routes = Router::new()
        .route("/streaks", get(handlers::stats_streaks))
        .route("/daily", get(handlers::stats_daily))
        .route("/documents", get(handlers::stats_documents))
        .route("/leaderboard", get(handlers::stats_leaderboard));

    let admin_routes = Router::new()
        .route("/cache/refresh", post(handlers::admin_cache_refresh))
        .route("/documents/{id}", delete(handlers::admin_document_delete));

    let api_routes = Router::new()
        .route("/activity", get(handlers::activity_list))
        .route("/info", get(handlers::info))
        .route("/devices", get(handlers::devices_list))
        .route("/devices/{id}/sync", put(handlers::device_sync_put))
        .route("/users/me/timezone", put(handlers::timezone_put));

    Router::new()
        .nest("/api/ko", device_routes)
        .nest("/api/stats", stats_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
