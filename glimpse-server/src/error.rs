//! Error types for glimpse-server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use glimpse_core::CaptureRegion;
use glimpse_eye::VisionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Failures visible to `/detect` callers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    MissingImage(String),

    #[error("{0}")]
    InvalidImage(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingImage(_) | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Inference(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VisionError> for ApiError {
    fn from(err: VisionError) -> Self {
        if err.is_input_error() {
            ApiError::InvalidImage(err.to_string())
        } else {
            ApiError::Inference(err.to_string())
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Failures while delivering a capture to the backend.
///
/// These never reach HTTP callers; the dispatcher logs and drops them.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Capture region {0:?} is empty")]
    EmptyRegion(CaptureRegion),

    #[error("Encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Sink error: {0}")]
    Sink(String),
}
