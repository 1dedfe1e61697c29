//! HTTP request handlers.

use crate::db::{
    self, Activity, DailyReadTotal, DatabaseInfo, Device, Document, DocumentUserStatistic,
    UserStreak,
};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::stats::{self, LeaderboardEntry, Metric, Period};
use crate::sync::{
    self, ActivityRequest, ActivityResponse, DocumentPushRequest, DocumentPushResponse,
    LastSyncRequest, LastSyncResponse, ProgressAck, ProgressRequest, ProgressResponse,
    ReconcileRequest, ReconcileResponse,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

/// Header carrying the username.
const AUTH_USER_HEADER: &str = "x-auth-user";

/// Header carrying the sync key.
const AUTH_KEY_HEADER: &str = "x-auth-key";

// ============================================================================
// DEVICE ACCOUNTS
// ============================================================================

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
}

/// Register response.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    username: String,
}

/// Register a device account.
pub async fn users_create(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let auth = state.auth.clone();
    let user = blocking(move || auth.register(&req.username, &req.password)).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { username: user.id })))
}

/// Auth check response.
#[derive(Debug, Serialize)]
pub struct AuthorizedResponse {
    authorized: &'static str,
}

/// Check device credentials.
pub async fn users_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AuthorizedResponse>> {
    authenticated_user(&state, &headers).await?;
    Ok(Json(AuthorizedResponse { authorized: "OK" }))
}

// ============================================================================
// SYNC PROTOCOL
// ============================================================================

/// Store a progress snapshot.
pub async fn progress_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<ProgressAck>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(sync::set_progress(&state.db, &user.id, &req)?))
}

/// Latest progress across the user's devices.
pub async fn progress_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(sync::get_progress(&state.db, &user.id, &document)?))
}

/// Append an activity batch.
pub async fn activity_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ActivityRequest>,
) -> Result<Json<ActivityResponse>> {
    let user = authenticated_user(&state, &headers).await?;
    let cancel = state.shutdown.child_token();
    Ok(Json(sync::record_activity(&state.db, &user.id, &req, &cancel)?))
}

/// Last activity timestamp for a device.
pub async fn activity_last_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LastSyncRequest>,
) -> Result<Json<LastSyncResponse>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(sync::last_sync_time(&state.db, &user.id, &req)?))
}

/// Merge document metadata.
pub async fn documents_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DocumentPushRequest>,
) -> Result<Json<DocumentPushResponse>> {
    authenticated_user(&state, &headers).await?;
    Ok(Json(sync::push_documents(&state.db, &req)?))
}

/// Reconcile a device inventory.
pub async fn documents_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(sync::reconcile(&state.db, &user.id, &req)?))
}

/// Upload parameters.
#[derive(Debug, Deserialize)]
pub struct FileUploadQuery {
    /// File extension, defaults to `epub`.
    ext: Option<String>,
    /// Word count computed by the device.
    words: Option<i64>,
}

/// Accept a canonical document file, streamed to disk.
pub async fn document_file_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<FileUploadQuery>,
    body: Body,
) -> Result<Json<Document>> {
    authenticated_user(&state, &headers).await?;

    let limit = state.config.storage.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(AppError::PayloadTooLarge(format!(
            "Upload exceeds {} bytes",
            limit
        )));
    }

    let ext = query.ext.as_deref().unwrap_or("epub");
    let doc = state
        .store_document_file(&id, ext, query.words, body.into_data_stream())
        .await?;
    Ok(Json(doc))
}

/// Stream a stored document file.
pub async fn document_file_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    authenticated_user(&state, &headers).await?;

    let doc = state
        .db
        .get_document(&id)?
        .filter(|d| !d.deleted)
        .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", id)))?;
    let path = state.document_file_path(&doc)?;

    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();
    let file_name = doc.filepath.unwrap_or_else(|| id.clone());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Cached streaks of the caller.
pub async fn stats_streaks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserStreak>>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.user_streaks(&user.id)?))
}

/// Cached 30 day totals of the caller.
pub async fn stats_daily(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DailyReadTotal>>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.daily_read_totals(&user.id)?))
}

/// Cached document statistics of the caller.
pub async fn stats_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DocumentUserStatistic>>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.document_statistics(&user.id)?))
}

/// Leaderboard parameters.
#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_metric")]
    metric: Metric,
    #[serde(default = "default_period")]
    period: Period,
}

fn default_metric() -> Metric {
    Metric::Words
}

fn default_period() -> Period {
    Period::All
}

/// Ranked users for one measure.
pub async fn stats_leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    authenticated_user(&state, &headers).await?;
    let rows = state.db.user_statistics()?;
    Ok(Json(stats::rank(&rows, query.metric, query.period)))
}

/// Activity listing parameters.
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    document: Option<String>,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Page through the caller's sessions.
pub async fn activity_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<Activity>>> {
    let user = authenticated_user(&state, &headers).await?;
    if query.offset < 0 || !(1..=1000).contains(&query.limit) {
        return Err(AppError::Validation(
            "offset must be >= 0 and limit within 1..=1000".to_string(),
        ));
    }

    let rows = state.db.list_activity(
        &user.id,
        query.document.as_deref(),
        query.offset,
        query.limit,
    )?;
    Ok(Json(rows))
}

/// Row counts for the caller.
pub async fn info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatabaseInfo>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.database_info(&user.id)?))
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Devices of the caller.
pub async fn devices_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Device>>> {
    let user = authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.list_devices(&user.id)?))
}

/// Full sync toggle.
#[derive(Debug, Deserialize)]
pub struct DeviceSyncRequest {
    enabled: bool,
}

/// Enable or disable full sync for one of the caller's devices.
pub async fn device_sync_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(req): Json<DeviceSyncRequest>,
) -> Result<Json<Device>> {
    let user = authenticated_user(&state, &headers).await?;

    if !state.db.set_device_sync(&user.id, &device_id, req.enabled)? {
        return Err(AppError::NotFound(format!("Device '{}' not found", device_id)));
    }

    let device = state
        .db
        .get_device(&user.id, &device_id)?
        .ok_or_else(|| AppError::NotFound(format!("Device '{}' not found", device_id)))?;
    Ok(Json(device))
}

/// Timezone update.
#[derive(Debug, Deserialize)]
pub struct TimezoneRequest {
    timezone: String,
}

/// Timezone update result.
#[derive(Debug, Serialize)]
pub struct TimezoneResponse {
    timezone: String,
    refresh_requested: bool,
}

/// Change the caller's timezone, requesting a rebuild when streaks are stale.
pub async fn timezone_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TimezoneRequest>,
) -> Result<Json<TimezoneResponse>> {
    let user = authenticated_user(&state, &headers).await?;
    let stale = state.auth.set_timezone(&user.id, req.timezone.trim())?;
    if stale {
        state.refresh.request();
    }

    Ok(Json(TimezoneResponse {
        timezone: req.timezone.trim().to_string(),
        refresh_requested: stale,
    }))
}

// ============================================================================
// ADMIN
// ============================================================================

/// Queue a statistics cache rebuild.
pub async fn admin_cache_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let user = authenticated_user(&state, &headers).await?;
    state.auth.require_admin(&user)?;

    state.refresh.request();
    tracing::info!(user = %user.id, "Cache refresh requested");
    Ok(StatusCode::ACCEPTED)
}

/// Tombstone a document so full-sync devices drop it.
pub async fn admin_document_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = authenticated_user(&state, &headers).await?;
    state.auth.require_admin(&user)?;

    if !state.db.set_deleted(&id, true)? {
        return Err(AppError::NotFound(format!("Document '{}' not found", id)));
    }

    tracing::info!(user = %user.id, document = %id, "Document marked deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// HELPERS
// ============================================================================

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Run password hashing work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Credential task failed: {}", e)))?
}

/// Resolve the caller from device credential headers.
async fn authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let (Some(username), Some(key)) = (
        header_value(headers, AUTH_USER_HEADER),
        header_value(headers, AUTH_KEY_HEADER),
    ) else {
        return Err(AppError::Unauthorized("Missing credentials".to_string()));
    };

    let auth = state.auth.clone();
    let (username, key) = (username.to_string(), key.to_string());
    blocking(move || auth.authenticate(&username, &key)).await
}
