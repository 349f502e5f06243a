//! HTTP surface: match endpoints, token estimates, catalog listing and health check.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::MatchError;
use crate::orchestrator::{CacheStatus, MatchEngine, MatchRequest};
use crate::selector::MatchResult;
use crate::tokens::{TokenEstimate, TokenEstimator};
use crate::vector_store::ProductSummary;

/// Header reporting `HIT` or `MISS` for the recipe cache.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
/// Header carrying the prior hit count on cache hits.
pub const X_CACHE_HITS: HeaderName = HeaderName::from_static("x-cache-hits");

const DEFAULT_PRODUCT_SAMPLE: usize = 10;
const MAX_PRODUCT_SAMPLE: usize = 100;

#[derive(Clone)]
struct AppState {
    engine: Arc<MatchEngine>,
    tokens: Arc<TokenEstimator>,
}

/// Builds the application router around a shared engine and token estimator.
pub fn router(engine: Arc<MatchEngine>, tokens: Arc<TokenEstimator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/match",
            post(match_full_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/match-production",
            post(match_production_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/tokens",
            post(tokens_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/products",
            get(products_handler).fallback(method_not_allowed),
        )
        .with_state(AppState { engine, tokens })
}

#[derive(Debug, Serialize)]
struct FullMatchResponse {
    results: Vec<MatchResult>,
}

#[derive(Debug, Serialize)]
struct ProductionMatchResponse {
    status: &'static str,
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProductsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProductsResponse {
    success: bool,
    count: usize,
    products: Vec<ProductSummary>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: ErrorBody,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Error rendered as the structured `{status: "error", ...}` envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        let code = err.code();
        match &err {
            MatchError::InvalidInput(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, code, message.clone())
            }
            MatchError::EmbeddingProvider(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, code, "failed to embed ingredients")
                    .with_details(err.to_string())
            }
            MatchError::VectorStore(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "failed to query product catalog",
            )
            .with_details(err.to_string()),
            MatchError::Internal(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "internal server error",
            )
            .with_details(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                "ingredients must be a non-empty list of strings",
            )
            .with_details(err.body_text()),
            other => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                "request body must be valid JSON",
            )
            .with_details(other.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, details = ?self.details, "{}", self.message);
        }
        let envelope = ErrorEnvelope {
            status: "error",
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        (self.status, Json(envelope)).into_response()
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        "method not allowed for this endpoint",
    )
}

async fn match_full_handler(
    State(state): State<AppState>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let served = state.engine.match_full(&request).await?;
    let body = FullMatchResponse {
        results: served.value,
    };
    Ok((cache_headers(served.cache), Json(body)).into_response())
}

async fn match_production_handler(
    State(state): State<AppState>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let served = state.engine.match_production(&request).await?;
    let body = ProductionMatchResponse {
        status: "success",
        ids: served.value,
    };
    Ok((cache_headers(served.cache), Json(body)).into_response())
}

async fn tokens_handler(
    State(state): State<AppState>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<TokenEstimate>, ApiError> {
    let Json(request) = payload?;
    let estimate = state
        .tokens
        .estimate(&request.ingredients, request.instructions.as_deref())?;
    Ok(Json(estimate))
}

async fn products_handler(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<ProductsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PRODUCT_SAMPLE)
        .clamp(1, MAX_PRODUCT_SAMPLE);
    let timeout = state.engine.settings().store_timeout();
    let products = tokio::time::timeout(timeout, state.engine.store().sample_products(limit))
        .await
        .map_err(|_| anyhow::anyhow!("catalog listing timed out after {:?}", timeout))
        .and_then(|listing| listing)
        .map_err(MatchError::VectorStore)?;
    Ok(Json(ProductsResponse {
        success: true,
        count: products.len(),
        products,
    }))
}

fn cache_headers(status: CacheStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match status {
        CacheStatus::Hit { hits } => {
            headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
            headers.insert(X_CACHE_HITS, HeaderValue::from(hits));
        }
        CacheStatus::Miss => {
            headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        }
    }
    headers
}
