//! HTTP triggers: on-demand generation, lookup and admin operations

pub mod harness;

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    AdvisoryError, VERSION,
    auth::{AdminGuard, require_basic_auth},
    batch::BatchSummary,
    error::Stage,
    processor::RegionHandler,
    regions::Region,
    services::Services,
    store::{ForecastDocument, migrate, parse_date},
};

type AppState = Arc<Services>;

/// JSON error body `{status: "error", timestamp, error}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    stage: Option<Stage>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            stage: None,
        }
    }
}

impl From<AdvisoryError> for ApiError {
    fn from(err: AdvisoryError) -> Self {
        let status = match &err {
            AdvisoryError::Validation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let stage = match &err {
            AdvisoryError::Region(region) => Some(region.stage()),
            _ => None,
        };
        Self {
            status,
            message: err.to_string(),
            stage,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "status": "error",
            "timestamp": Utc::now(),
            "error": self.message,
        });
        if let Some(stage) = self.stage {
            body["stage"] = json!(stage);
        }
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Scope {
    #[default]
    All,
    Smoke,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    regions: Option<Vec<String>>,
    #[serde(default)]
    scope: Scope,
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    date: Option<String>,
    generate: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SummaryCounts {
    total: usize,
    success: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct SucceededRegion {
    region: String,
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct FailedRegion {
    region: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchResults {
    success: Vec<SucceededRegion>,
    failed: Vec<FailedRegion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    summary: SummaryCounts,
    results: BatchResults,
    processing_time_ms: u64,
}

impl From<BatchSummary> for BatchResponse {
    fn from(summary: BatchSummary) -> Self {
        let mut results = BatchResults {
            success: Vec::new(),
            failed: Vec::new(),
        };
        for outcome in summary.outcomes {
            if outcome.is_success() {
                results.success.push(SucceededRegion {
                    region: outcome.display_name,
                    code: outcome.region_code,
                    message: outcome.message.unwrap_or_default(),
                });
            } else {
                results.failed.push(FailedRegion {
                    region: outcome.display_name,
                    code: outcome.region_code,
                    stage: outcome.stage,
                    error: outcome.error.unwrap_or_default(),
                });
            }
        }

        Self {
            status: "completed",
            timestamp: Utc::now(),
            summary: SummaryCounts {
                total: summary.total_regions,
                success: summary.success_count,
                failed: summary.failure_count,
            },
            results,
            processing_time_ms: summary.processing_time_ms,
        }
    }
}

/// Parse an optional JSON body; an empty body yields the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))
}

pub fn router(services: AppState) -> Router {
    let server = &services.config.server;
    let migration_guard = AdminGuard::new(server.admin_user.clone(), server.migration_secret.clone());
    let test_guard = AdminGuard::new(server.admin_user.clone(), server.test_secret.clone());

    let migration = Router::new()
        .route("/admin/migrate", post(run_migration))
        .route_layer(middleware::from_fn_with_state(migration_guard, require_basic_auth));
    let notification_test = Router::new()
        .route("/admin/notifications/test", post(run_notification_test))
        .route_layer(middleware::from_fn_with_state(test_guard, require_basic_auth));

    Router::new()
        .route("/health", get(health))
        .route("/forecasts/generate", post(generate))
        .route("/forecasts/{code}", get(get_forecast))
        .route("/forecasts/{code}/regenerate", post(regenerate))
        .merge(migration)
        .merge(notification_test)
        .with_state(services)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

fn resolve_scope(services: &Services, request: &GenerateRequest) -> Result<Vec<Region>, ApiError> {
    if let Some(codes) = request.regions.as_ref().filter(|c| !c.is_empty()) {
        return Ok(services.catalog.select(codes)?);
    }
    Ok(match request.scope {
        Scope::Smoke => services.catalog.smoke_test(),
        Scope::All => services.catalog.all().to_vec(),
    })
}

async fn generate(
    State(services): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchResponse>, ApiError> {
    let request: GenerateRequest = parse_body(&body)?;
    let regions = resolve_scope(&services, &request)?;
    info!(regions = regions.len(), "On-demand generation requested");

    let summary = services.orchestrator.run(&regions).await?;
    Ok(Json(summary.into()))
}

fn known_region<'a>(services: &'a Services, code: &str) -> Result<&'a Region, ApiError> {
    services
        .catalog
        .find(code)
        .ok_or_else(|| AdvisoryError::validation(format!("unknown region code: {code}")).into())
}

async fn get_forecast(
    State(services): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<ForecastDocument>, ApiError> {
    known_region(&services, &code)?;
    let today = services.store.today();
    let date = match query.date.as_deref() {
        Some(value) => parse_date(value)?,
        None => today,
    };

    if let Some(document) = services
        .store
        .load(&code, Some(date))
        .await
        .map_err(AdvisoryError::from)?
    {
        return Ok(Json(document));
    }

    if query.generate.unwrap_or(false) && date == today {
        info!(region_code = %code, "No document for today, generating on demand");
        services
            .processor
            .process(&code)
            .await
            .map_err(AdvisoryError::from)?;
        if let Some(document) = services
            .store
            .load(&code, Some(date))
            .await
            .map_err(AdvisoryError::from)?
        {
            return Ok(Json(document));
        }
    }

    Err(ApiError::new(
        StatusCode::NOT_FOUND,
        format!("no forecast for {code} on {}", date.format("%Y%m%d")),
    ))
}

async fn regenerate(
    State(services): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let region = known_region(&services, &code)?.clone();

    let result = services
        .processor
        .process(&region.code)
        .await
        .map_err(AdvisoryError::from)?;

    Ok(Json(json!({
        "status": "completed",
        "timestamp": Utc::now(),
        "region": region.display_name,
        "code": region.code,
        "message": result.message,
        "documentId": result.document_id,
    })))
}

async fn run_migration(State(services): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = migrate(services.store.documents().as_ref())
        .await
        .map_err(AdvisoryError::from)?;
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "Migration left documents behind");
    }
    Ok(Json(json!({ "status": "completed", "report": report })))
}

async fn run_notification_test(
    State(services): State<AppState>,
    body: Bytes,
) -> Result<Json<harness::HarnessResponse>, ApiError> {
    let request: harness::HarnessRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))?;
    Ok(Json(harness::run(&services, request).await?))
}
