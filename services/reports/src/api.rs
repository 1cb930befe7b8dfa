use crate::config::ApiConfig;
use crate::query_engine::{QueryEngine, QueryError, TimeSeriesPoint, WardDateCounts};
use crate::record_store::{ImageRecord, PgRecordStore};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub store: Arc<PgRecordStore>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Query parameters for the per-ward, per-date count endpoint. Absent
/// parameters default to empty strings so that missing and empty inputs
/// fail validation the same way.
#[derive(Debug, Deserialize)]
pub struct ImageCountQuery {
    #[serde(default)]
    pub ward: String,
    #[serde(default)]
    pub date: String,
}

/// Query parameters for the ward time-series endpoint
#[derive(Debug, Deserialize)]
pub struct WardSeriesQuery {
    #[serde(default)]
    pub ward: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    // Route paths kept compatible with the dashboard's existing client.
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/data", get(get_data))
        .route("/image-count", get(get_image_count))
        .route("/ward-image-count", get(get_ward_image_count))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "report-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Full listing of stored reports
#[instrument(skip(state))]
async fn get_data(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImageRecord>>, (StatusCode, Json<ErrorResponse>)> {
    let records = state.engine.fetch_all().await.map_err(map_query_error)?;
    Ok(Json(records))
}

/// Garbage/mosquito counts for a ward on a date
#[instrument(skip(state))]
async fn get_image_count(
    State(state): State<AppState>,
    Query(params): Query<ImageCountQuery>,
) -> Result<Json<WardDateCounts>, (StatusCode, Json<ErrorResponse>)> {
    let counts = state
        .engine
        .count_by_ward_and_date(&params.ward, &params.date)
        .await
        .map_err(map_query_error)?;
    Ok(Json(counts))
}

/// Date-ordered per-type counts for a ward
#[instrument(skip(state))]
async fn get_ward_image_count(
    State(state): State<AppState>,
    Query(params): Query<WardSeriesQuery>,
) -> Result<Json<Vec<TimeSeriesPoint>>, (StatusCode, Json<ErrorResponse>)> {
    let series = state
        .engine
        .time_series_by_ward(&params.ward)
        .await
        .map_err(map_query_error)?;
    Ok(Json(series))
}

/// Map engine errors onto the wire: validation failures are the caller's
/// to fix (400), backend failures are logged and surfaced as 500
fn map_query_error(err: QueryError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        QueryError::Validation(message) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: message,
                code: "MISSING_PARAMETER".to_string(),
            }),
        ),
        QueryError::Backend(e) => {
            error!(error = %e, "Record store query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to query image reports".to_string(),
                    code: "QUERY_ERROR".to_string(),
                }),
            )
        }
    }
}

/// Start the query API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting report query API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::StoreError;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let (status, Json(body)) =
            map_query_error(QueryError::Validation("ward is required".to_string()));

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "MISSING_PARAMETER");
        assert_eq!(body.error, "ward is required");
    }

    #[test]
    fn backend_errors_map_to_internal_server_error() {
        let err = QueryError::Backend(StoreError::Database(sqlx::Error::PoolTimedOut));
        let (status, Json(body)) = map_query_error(err);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "QUERY_ERROR");
    }

    #[test]
    fn absent_query_params_deserialize_to_empty_strings() {
        use axum::http::Uri;

        let uri = Uri::from_static("http://localhost/image-count");
        let Query(params) = Query::<ImageCountQuery>::try_from_uri(&uri).unwrap();
        assert!(params.ward.is_empty());
        assert!(params.date.is_empty());

        let uri = Uri::from_static("http://localhost/image-count?ward=A");
        let Query(params) = Query::<ImageCountQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(params.ward, "A");
        assert!(params.date.is_empty());
    }
}
