//! Capture forwarding to the storage backend
//!
//! A capture is cropped out of the source image, encoded as JPEG and posted
//! as the multipart field `image` to `<backend>/save-image`.

use crate::error::ForwardError;
use async_trait::async_trait;
use glimpse_core::config::BackendConfig;
use glimpse_core::CaptureRegion;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const CAPTURE_FIELD: &str = "image";
pub const CAPTURE_FILENAME: &str = "capture.jpg";
pub const CAPTURE_CONTENT_TYPE: &str = "image/jpeg";
pub const SAVE_IMAGE_PATH: &str = "/save-image";

/// One capture waiting to be forwarded
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub class_name: String,
    pub region: CaptureRegion,
    pub image: Arc<DynamicImage>,
}

/// Encoded capture, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePayload {
    pub bytes: Vec<u8>,
    pub filename: &'static str,
    pub content_type: &'static str,
}

/// Backend acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct SinkAck {
    pub status: u16,
    /// Response body as JSON, or as a JSON string when it was not JSON
    pub body: Value,
}

/// Crop `region` out of `image` and encode it as JPEG
pub fn encode_capture(
    image: &DynamicImage,
    region: &CaptureRegion,
) -> Result<CapturePayload, ForwardError> {
    if region.is_empty() || region.x1 >= image.width() || region.y1 >= image.height() {
        return Err(ForwardError::EmptyRegion(*region));
    }

    let crop = image
        .crop_imm(region.x1, region.y1, region.width(), region.height())
        .to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new(&mut bytes).encode(
        crop.as_raw(),
        crop.width(),
        crop.height(),
        ColorType::Rgb8,
    )?;

    Ok(CapturePayload {
        bytes,
        filename: CAPTURE_FILENAME,
        content_type: CAPTURE_CONTENT_TYPE,
    })
}

/// Destination for encoded captures
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn send(&self, payload: CapturePayload) -> Result<SinkAck, ForwardError>;
}

/// Posts captures to `<base_url>/save-image`
pub struct HttpCaptureSink {
    client: Client,
    endpoint: String,
}

impl HttpCaptureSink {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ForwardError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: save_image_url(base_url),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ForwardError> {
        Self::new(&config.base_url, config.timeout_secs.map(Duration::from_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CaptureSink for HttpCaptureSink {
    async fn send(&self, payload: CapturePayload) -> Result<SinkAck, ForwardError> {
        let part = Part::bytes(payload.bytes)
            .file_name(payload.filename)
            .mime_str(payload.content_type)?;
        let form = Form::new().part(CAPTURE_FIELD, part);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(SinkAck {
            status: status.as_u16(),
            body,
        })
    }
}

/// Join the backend base URL and the save endpoint without doubling slashes
pub fn save_image_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim().trim_end_matches('/'), SAVE_IMAGE_PATH)
}

/// Encodes capture jobs and delivers them to a sink
#[derive(Clone)]
pub struct Forwarder {
    sink: Arc<dyn CaptureSink>,
}

impl Forwarder {
    pub fn new(sink: Arc<dyn CaptureSink>) -> Self {
        Self { sink }
    }

    /// Encode and deliver one capture. Callers decide what to do with the
    /// error; nothing here retries.
    pub async fn forward(&self, job: &CaptureJob) -> Result<SinkAck, ForwardError> {
        let payload = encode_capture(&job.image, &job.region)?;
        debug!(
            "Forwarding {} capture {}x{} ({} bytes)",
            job.class_name,
            job.region.width(),
            job.region.height(),
            payload.bytes.len()
        );
        self.sink.send(payload).await
    }
}
