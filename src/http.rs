//! HTTP transport module for nutrilens
//!
//! A single analyze endpoint over the estimation pipeline plus a health probe.
//! Uploads are `multipart/form-data` with the photo in the `image` file field.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use nutrilens::{NutritionError, SampleAggregator, config::Config, storage::UploadStore};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, debug, info, info_span, warn};

/// Form field carrying the uploaded photo
const IMAGE_FIELD: &str = "image";

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub aggregator: Arc<SampleAggregator>,
    pub store: UploadStore,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Normalize the uploaded image, run the sampling pipeline and return the estimate.
pub async fn analyze_handler(
    State(state): State<HttpState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("analyze", %request_id);

    async move {
        let (filename, bytes) = match read_image_field(multipart).await {
            Ok(upload) => upload,
            Err(response) => return response,
        };

        let stored = match state.store.store_canonical(&filename, &bytes).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("image processing failed: {}", err);
                return error_response(err);
            }
        };
        info!(path = %stored.path.display(), "canonical image stored");

        match state.aggregator.estimate(&stored.image).await {
            Ok(report) => {
                let mut response = (StatusCode::OK, Json(&report.estimate)).into_response();
                let headers = response.headers_mut();
                headers.insert("x-samples-used", HeaderValue::from(report.samples_used));
                headers.insert("x-samples-failed", HeaderValue::from(report.failures.len()));
                response
            }
            Err(err) => {
                warn!("estimation failed: {}", err);
                error_response(err)
            }
        }
    }
    .instrument(span)
    .await
}

/// Pull the `image` file field out of the form as (client filename, bytes).
async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, Bytes), Response> {
    let mut multipart = multipart.map_err(|rejection| {
        error_body(StatusCode::BAD_REQUEST, "No file uploaded.", &rejection.body_text())
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(error_body(
                    StatusCode::BAD_REQUEST,
                    "No file uploaded.",
                    "form has no 'image' field",
                ));
            }
            Err(err) => {
                return Err(error_body(
                    StatusCode::BAD_REQUEST,
                    "No file uploaded.",
                    &err.body_text(),
                ));
            }
        };
        if field.name() != Some(IMAGE_FIELD) {
            debug!(field = ?field.name(), "skipping form field");
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(error_body(
                StatusCode::BAD_REQUEST,
                "No file selected.",
                "the 'image' field has no filename",
            ));
        }
        let bytes = field.bytes().await.map_err(|err| {
            error_body(StatusCode::BAD_REQUEST, "No file uploaded.", &err.body_text())
        })?;
        return Ok((filename, bytes));
    }
}

/// Map a pipeline error onto a status code and the `{error, details}` body.
fn error_response(err: NutritionError) -> Response {
    let (status, label) = match &err {
        NutritionError::ImageDecode { .. } => {
            (StatusCode::BAD_REQUEST, "Image processing failed.".to_string())
        }
        NutritionError::Iteration { iteration, .. } => (
            StatusCode::BAD_GATEWAY,
            format!("AI API call failed on iteration {iteration}"),
        ),
        NutritionError::ClassificationService { .. }
        | NutritionError::GenerationService { .. }
        | NutritionError::ResponseFormat { .. } => {
            (StatusCode::BAD_GATEWAY, "AI API call failed".to_string())
        }
        NutritionError::Aggregation { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "AI API did not return any results.".to_string(),
        ),
        NutritionError::Config { .. }
        | NutritionError::Storage { .. }
        | NutritionError::Serialization { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unexpected server error".to_string(),
        ),
    };
    let details = match &err {
        NutritionError::Iteration { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    error_body(status, &label, &details)
}

fn error_body(status: StatusCode, error: &str, details: &str) -> Response {
    (status, Json(json!({ "error": error, "details": details }))).into_response()
}

pub fn router(state: HttpState) -> Router {
    let max_upload = state.config.runtime.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/analyze-image", post(analyze_handler))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_http_server(config: Arc<Config>, aggregator: SampleAggregator) -> anyhow::Result<()> {
    let bind = config.runtime.http_bind;
    let state = HttpState {
        store: UploadStore::new(config.storage.upload_dir.clone()),
        config,
        aggregator: Arc::new(aggregator),
    };

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("nutrilens HTTP listening on {}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
