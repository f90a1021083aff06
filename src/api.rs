use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::dataset::{DateKey, DateSelection, Heatmap, QueryError, Reading};
use crate::db::SavedCollection;
use crate::ingest::{IngestError, UploadFile};
use crate::services::insight_service::{ChannelInfo, CostReport, UsageStatistics, ALL_CHANNELS};
use crate::services::{
    CollectionError, CollectionService, IngestService, InsightService, SaveCollectionRequest,
    UploadSummary,
};

/// Uploads carry base64 spreadsheets and zips, well past axum's 2 MB default
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ingest_service: IngestService,
    pub insight_service: InsightService,
    pub collection_service: CollectionService,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub dataset_rows: usize,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
}

#[derive(Serialize)]
pub struct DatesResponse {
    pub dates: Vec<DateKey>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetParams {
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CostParams {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct GroupParams {
    pub group: String,
}

/// Error response: a status code plus `{"error": "<message>"}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match &e {
            IngestError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            IngestError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            IngestError::SchemaViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::Io { .. } | IngestError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Ingest failed: {}", e);
        } else {
            warn!("Upload rejected: {}", e);
        }
        Self::new(status, e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        let status = match &e {
            QueryError::ChannelNotFound(_) | QueryError::DateNotFound(_) | QueryError::NoData => {
                StatusCode::NOT_FOUND
            }
            QueryError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        };
        warn!("Query failed: {}", e);
        Self::new(status, e.to_string())
    }
}

impl From<CollectionError> for ApiError {
    fn from(e: CollectionError) -> Self {
        match e {
            CollectionError::Query(q) => q.into(),
            CollectionError::Duplicate { .. } => {
                warn!("{}", e);
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            CollectionError::Database(_) | CollectionError::Export(_) => {
                error!("Collection operation failed: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route(
            "/uploads",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/reload", post(reload))
        .route("/dataset", get(get_dataset))
        .route("/dates", get(get_dates))
        .route("/channels", get(get_channels))
        .route("/heatmap", get(get_heatmap))
        .route("/statistics", get(get_statistics))
        .route("/costs", get(get_costs))
        .route("/costs/summary", get(get_cost_summary))
        .route("/collections", post(save_collection).get(list_collections))
        .route("/collections/export", get(export_collections))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    debug!("Health check requested");
    let response = HealthResponse {
        status: "healthy".to_string(),
        dataset_rows: state.ingest_service.snapshot().await.scaled.len(),
    };
    (StatusCode::OK, Json(response))
}

#[instrument(skip(state, request), fields(files = request.files.len()))]
async fn upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadSummary>, ApiError> {
    debug!(
        "Received upload of {:?}",
        request.files.iter().map(|f| f.filename.as_str()).collect::<Vec<_>>()
    );
    let summary = state.ingest_service.upload(request.files).await?;
    info!(
        "Upload complete: {} files staged, {} dataset rows",
        summary.files_staged, summary.dataset_rows
    );
    Ok(Json(summary))
}

#[instrument(skip(state))]
async fn reload(State(state): State<AppState>) -> Result<Json<UploadSummary>, ApiError> {
    let summary = state.ingest_service.reload().await?;
    info!("Reload complete: {} dataset rows", summary.dataset_rows);
    Ok(Json(summary))
}

#[instrument(skip(state))]
async fn get_dataset(
    State(state): State<AppState>,
    Query(params): Query<DatasetParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let selection: DateSelection = params
        .view
        .as_deref()
        .unwrap_or_default()
        .parse()
        .unwrap_or_default();
    let channel = params.channel.as_deref().filter(|c| *c != ALL_CHANNELS);

    let rows = state
        .insight_service
        .dataset_view(&selection, channel)
        .await?;
    debug!("Returning {} dataset rows", rows.len());
    Ok(Json(rows))
}

#[instrument(skip(state))]
async fn get_dates(State(state): State<AppState>) -> Json<DatesResponse> {
    Json(DatesResponse {
        dates: state.insight_service.dates().await,
    })
}

#[instrument(skip(state))]
async fn get_channels(State(state): State<AppState>) -> Json<Vec<ChannelInfo>> {
    Json(state.insight_service.channel_listing().await)
}

#[instrument(skip(state))]
async fn get_heatmap(
    State(state): State<AppState>,
    Query(params): Query<ChannelParams>,
) -> Result<Json<Heatmap>, ApiError> {
    Ok(Json(state.insight_service.heatmap(&params.channel).await?))
}

#[instrument(skip(state))]
async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<UsageStatistics>, ApiError> {
    let channel = params.channel.as_deref().unwrap_or(ALL_CHANNELS);
    Ok(Json(state.insight_service.statistics(channel).await?))
}

#[instrument(skip(state))]
async fn get_costs(
    State(state): State<AppState>,
    Query(params): Query<CostParams>,
) -> Result<Json<CostReport>, ApiError> {
    let report = state
        .insight_service
        .costs(params.channel.as_deref(), params.start, params.end)
        .await?;
    info!(
        "Cost report: {:.3} total cost, {:.3} total carbon",
        report.total_cost, report.total_carbon
    );
    Ok(Json(report))
}

#[instrument(skip(state))]
async fn get_cost_summary(State(state): State<AppState>) -> Result<Json<CostReport>, ApiError> {
    Ok(Json(state.insight_service.cost_summary().await?))
}

#[instrument(skip(state, request), fields(group = %request.group_name))]
async fn save_collection(
    State(state): State<AppState>,
    Json(request): Json<SaveCollectionRequest>,
) -> Result<(StatusCode, Json<SavedCollection>), ApiError> {
    let saved = state.collection_service.save(request).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[instrument(skip(state))]
async fn list_collections(
    State(state): State<AppState>,
    Query(params): Query<GroupParams>,
) -> Result<Json<Vec<SavedCollection>>, ApiError> {
    let collections = state.collection_service.list(&params.group).await?;
    info!(
        "Retrieved {} saved collections for group {}",
        collections.len(),
        params.group
    );
    Ok(Json(collections))
}

#[instrument(skip(state))]
async fn export_collections(
    State(state): State<AppState>,
    Query(params): Query<GroupParams>,
) -> Result<impl IntoResponse, ApiError> {
    let csv = state.collection_service.export_csv(&params.group).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    ))
}
