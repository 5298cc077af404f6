// HTTP server with the detection route

use crate::dispatcher::{CaptureDispatcher, DispatchSnapshot};
use crate::error::ApiError;
use crate::forwarder::{CaptureJob, CAPTURE_FIELD};
use axum::{
    body::Bytes,
    extract::multipart::{MultipartError, MultipartRejection},
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use glimpse_core::{CaptureEngine, Detection};
use glimpse_eye::DetectionPipeline;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state for every route
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: DetectionPipeline,
    pub engine: CaptureEngine,
    pub dispatcher: Arc<CaptureDispatcher>,
    pub max_upload_bytes: usize,
}

/// Overall outcome of a detection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectStatus {
    Success,
    Failure,
}

/// One reported detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub status: DetectStatus,
    pub detections: Vec<DetectionSummary>,
}

impl DetectResponse {
    /// Every detection is reported, captured or not
    pub fn from_detections(detections: &[Detection]) -> Self {
        let detections: Vec<DetectionSummary> = detections
            .iter()
            .map(|d| DetectionSummary {
                class_name: d.class_name.clone(),
                confidence: d.confidence,
            })
            .collect();

        let status = if detections.is_empty() {
            DetectStatus::Failure
        } else {
            DetectStatus::Success
        };

        Self { status, detections }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub detector: String,
    pub captures: DispatchSnapshot,
}

/// Build the application router
pub fn create_router(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/detect", post(detect_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run detection over one uploaded image
async fn detect_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::MissingImage(e.body_text()))?;
    let bytes = read_image_field(&mut multipart).await?;
    debug!("Received {} byte upload", bytes.len());

    let pipeline = state.pipeline.clone();
    let analysis = tokio::task::spawn_blocking(move || pipeline.analyze(&bytes))
        .await
        .map_err(|e| ApiError::Internal(format!("Detection task failed: {}", e)))??;

    let image = analysis.image.clone();
    let dispatcher = state.dispatcher.clone();
    state
        .engine
        .evaluate_frame(&analysis.detections, analysis.dimensions, |detection, region| {
            if region.is_empty() {
                warn!("Skipping {} capture with empty region {:?}", detection.class_name, region);
                return;
            }
            info!(
                "Capturing {} ({:.2}) at {:?}",
                detection.class_name, detection.confidence, region
            );
            dispatcher.dispatch(CaptureJob {
                class_name: detection.class_name.clone(),
                region,
                image: image.clone(),
            });
        });

    Ok(Json(DetectResponse::from_detections(&analysis.detections)))
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(CAPTURE_FIELD) {
            continue;
        }

        let data = field.bytes().await.map_err(upload_error)?;
        if data.is_empty() {
            return Err(ApiError::MissingImage("No image uploaded".to_string()));
        }
        return Ok(data);
    }

    Err(ApiError::MissingImage("No image uploaded".to_string()))
}

fn upload_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::MissingImage(err.body_text())
    }
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        detector: state.pipeline.detector_name().to_string(),
        captures: state.dispatcher.stats(),
    })
}
