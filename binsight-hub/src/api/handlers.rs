//! REST handlers for the hub's query and ingestion surface
//!
//! Listing and statistics reads go through the aggregate cache; every
//! successful write path invalidates it.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use binsight_common::model::{Alert, ClassificationPage, ClassificationRecord, SearchCriteria, StatisticsSnapshot};
use binsight_common::payload::ClassificationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::cache::{ListingKey, StatsKey};
use crate::db;
use crate::ingest;
use crate::overrides::{self, OverrideRequest};
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::state::AppState;
use crate::stats;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
///
/// Does not require authentication; answers as long as the server runs.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "binsight-hub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Reply for a stored classification
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: i64,
    pub detection_id: String,
    pub final_label: String,
    pub disposal_location: String,
}

/// POST /api/classifications
///
/// Alternate producer path next to the hub command; same validation,
/// same broadcast.
pub async fn ingest_classification(
    State(state): State<AppState>,
    Json(payload): Json<ClassificationPayload>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let record = ingest::ingest_payload(&state, &payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            id: record.id,
            detection_id: record.detection_id,
            final_label: record.final_label,
            disposal_location: record.disposal_location,
        }),
    ))
}

/// Query parameters for the paged listing
#[derive(Debug, Deserialize)]
pub struct ListingParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Substring match against the effective label
    pub label: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// GET /api/classifications
pub async fn list_classifications(
    State(state): State<AppState>,
    Query(params): Query<ListingParams>,
) -> Result<Json<ClassificationPage>, ApiError> {
    let key = ListingKey {
        page: params.page,
        page_size: params.page_size,
        label: params.label.clone(),
    };

    let page = state
        .cache
        .listing_or_compute(key, || {
            db::classifications::page(&state.db, params.page, params.page_size, params.label.as_deref())
        })
        .await?;

    Ok(Json(page))
}

/// Search response with result count
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total_results: usize,
    pub results: Vec<ClassificationRecord>,
}

/// GET /api/classifications/search
///
/// Composite criteria; absent fields do not constrain. Not cached, the
/// criteria space is too wide to be worth keying.
pub async fn search_classifications(
    State(state): State<AppState>,
    Query(criteria): Query<SearchCriteria>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = db::classifications::search(&state.db, &criteria).await?;

    Ok(Json(SearchResponse {
        total_results: results.len(),
        results,
    }))
}

/// GET /api/classifications/:id
pub async fn get_classification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClassificationRecord>, ApiError> {
    let record = db::classifications::get(&state.db, id).await?;
    Ok(Json(record))
}

/// GET /api/classifications/:id/image
///
/// The blob lives outside the record payload and is fetched on demand.
pub async fn get_classification_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (bytes, format) = db::classifications::get_image(&state.db, id).await?;
    let content_type = format!("image/{format}");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// Reply for the idempotent delete
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub removed: bool,
}

/// DELETE /api/classifications/:id
pub async fn delete_classification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = db::classifications::delete(&state.db, id).await?;

    if removed {
        state.cache.invalidate_all().await;
        info!(classification_id = id, "Classification deleted");
    }

    Ok(Json(DeleteResponse { removed }))
}

/// Override request body
///
/// Required fields arrive as options so absence fails domain validation
/// (400 with the field named) instead of body deserialization.
#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub new_classification: Option<String>,
    pub new_disposal_location: Option<String>,
    pub reason: Option<String>,
    pub user_id: Option<String>,
}

/// Reply for an applied override
#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub applied: bool,
    pub classification_id: i64,
}

/// POST /api/classifications/:id/override
pub async fn override_classification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let request = OverrideRequest {
        new_classification: body.new_classification.unwrap_or_default(),
        new_disposal_location: body.new_disposal_location,
        reason: body.reason.unwrap_or_default(),
        user_id: body.user_id,
    };

    let applied = overrides::apply_override(&state, id, request).await?;
    if !applied {
        return Err(ApiError::not_found(format!("classification {id}")));
    }

    Ok(Json(OverrideResponse {
        applied: true,
        classification_id: id,
    }))
}

/// Query parameters for the statistics window
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/statistics
pub async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatisticsSnapshot>, ApiError> {
    let key = StatsKey {
        from: params.from,
        to: params.to,
    };

    let snapshot = state
        .cache
        .stats_or_compute(key, || {
            stats::compute_statistics(&state.db, params.from, params.to)
        })
        .await?;

    Ok(Json(snapshot))
}

/// Query parameters for the alert listing
#[derive(Debug, Deserialize)]
pub struct AlertsParams {
    /// When true, only unresolved alerts come back
    #[serde(default)]
    pub active: bool,
}

/// Alert listing with count
#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub total_alerts: usize,
    pub alerts: Vec<Alert>,
}

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertsParams>,
) -> Json<AlertsResponse> {
    let alerts = state.alerts.recent(params.active).await;

    Json(AlertsResponse {
        total_alerts: alerts.len(),
        alerts,
    })
}

/// Alert resolution body
#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    /// Defaults to "unknown"
    pub resolved_by: Option<String>,
}

/// Reply for an alert resolution
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    /// False when the alert was already resolved
    pub resolved: bool,
}

/// POST /api/alerts/:id/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let resolved_by = body.resolved_by.unwrap_or_else(|| "unknown".to_string());
    let resolved = state.alerts.resolve(id, &resolved_by).await?;

    Ok(Json(ResolveResponse { resolved }))
}
