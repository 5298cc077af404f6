// Detection API tests
// Drive the router end to end with a scripted detector and an in-memory capture sink

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use glimpse_core::{BoundingBox, CaptureEngine, CapturePolicy, Detection};
use glimpse_eye::{DetectionPipeline, Detector, VisionError};
use glimpse_server::{
    create_router, ApiState, CaptureDispatcher, CapturePayload, CaptureSink, ForwardError, SinkAck,
};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

const BOUNDARY: &str = "glimpse-test-boundary";

/// Replays queued results, then keeps returning the last one
struct ScriptedDetector {
    script: Mutex<VecDeque<Result<Vec<Detection>, String>>>,
    last: Mutex<Result<Vec<Detection>, String>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    fn new(script: Vec<Result<Vec<Detection>, String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
        })
    }

    fn always(detections: Vec<Detection>) -> Arc<Self> {
        Self::new(vec![Ok(detections)])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = match self.script.lock().pop_front() {
            Some(result) => {
                *self.last.lock() = result.clone();
                result
            }
            None => self.last.lock().clone(),
        };
        next.map_err(VisionError::Ort)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Hands every payload to the test
struct RecordingSink {
    tx: mpsc::UnboundedSender<CapturePayload>,
}

#[async_trait]
impl CaptureSink for RecordingSink {
    async fn send(&self, payload: CapturePayload) -> Result<SinkAck, ForwardError> {
        let _ = self.tx.send(payload);
        Ok(SinkAck {
            status: 200,
            body: json!({"saved": true}),
        })
    }
}

struct FailingSink;

#[async_trait]
impl CaptureSink for FailingSink {
    async fn send(&self, _payload: CapturePayload) -> Result<SinkAck, ForwardError> {
        Err(ForwardError::Status {
            status: 503,
            body: "backend down".to_string(),
        })
    }
}

struct Harness {
    app: Router,
    engine: CaptureEngine,
    dispatcher: Arc<CaptureDispatcher>,
}

fn harness(detector: Arc<dyn Detector>, sink: Arc<dyn CaptureSink>) -> Harness {
    harness_with_limit(detector, sink, 16 * 1024 * 1024)
}

fn harness_with_limit(
    detector: Arc<dyn Detector>,
    sink: Arc<dyn CaptureSink>,
    limit: usize,
) -> Harness {
    let engine = CaptureEngine::new(CapturePolicy::default());
    let dispatcher = Arc::new(CaptureDispatcher::new(sink));
    let state = ApiState {
        pipeline: DetectionPipeline::new(detector),
        engine: engine.clone(),
        dispatcher: dispatcher.clone(),
        max_upload_bytes: limit,
    };
    Harness {
        app: create_router(state),
        engine,
        dispatcher,
    }
}

fn recording_sink() -> (Arc<dyn CaptureSink>, mpsc::UnboundedReceiver<CapturePayload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingSink { tx }), rx)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageOutputFormat::Png).unwrap();
    bytes.into_inner()
}

fn card(confidence: f32) -> Detection {
    Detection::new(0, "card", confidence, BoundingBox::new(10.0, 10.0, 50.0, 50.0))
}

fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"frame.png\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn detect_request(field: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/detect")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, data)))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_missing_image_field() {
    let detector = ScriptedDetector::always(vec![card(0.9)]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector.clone(), sink);

    let (status, body) = send(&h.app, detect_request("photo", &png(8, 8))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image uploaded"}));
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_empty_image_field() {
    let detector = ScriptedDetector::always(vec![card(0.9)]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector.clone(), sink);

    let (status, body) = send(&h.app, detect_request("image", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image uploaded"}));
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_non_multipart_body() {
    let detector = ScriptedDetector::always(vec![card(0.9)]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector.clone(), sink);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"image": "nope"}"#))
        .unwrap();

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_undecodable_image() {
    let detector = ScriptedDetector::always(vec![card(0.9)]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector.clone(), sink);

    let (status, body) = send(&h.app, detect_request("image", b"definitely not an image")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(detector.calls(), 0);
    assert!(h.engine.counters().snapshot().is_empty());
}

#[tokio::test]
async fn test_no_detections_reports_failure() {
    let detector = ScriptedDetector::always(Vec::new());
    let (sink, _rx) = recording_sink();
    let h = harness(detector, sink);

    let (status, body) = send(&h.app, detect_request("image", &png(32, 32))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "failure", "detections": []}));
    assert!(h.engine.counters().snapshot().is_empty());
}

#[tokio::test]
async fn test_all_detections_reported() {
    let person = Detection::new(3, "person", 0.25, BoundingBox::new(0.0, 0.0, 5.0, 5.0));
    let detector = ScriptedDetector::always(vec![card(0.5), person]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector, sink);

    let (status, body) = send(&h.app, detect_request("image", &png(100, 100))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["detections"],
        json!([
            {"class": "card", "confidence": 0.5},
            {"class": "person", "confidence": 0.25}
        ])
    );
}

#[tokio::test]
async fn test_second_qualifying_frame_forwards_capture() {
    let detector = ScriptedDetector::always(vec![card(0.5)]);
    let (sink, mut rx) = recording_sink();
    let h = harness(detector, sink);
    let image = png(100, 100);

    let (status, _) = send(&h.app, detect_request("image", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.engine.counters().count("card"), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    let (status, body) = send(&h.app, detect_request("image", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(h.engine.counters().count("card"), 0);

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload.filename, "capture.jpg");
    assert_eq!(payload.content_type, "image/jpeg");

    let crop = image::load_from_memory(&payload.bytes).unwrap();
    assert_eq!((crop.width(), crop.height()), (60, 60));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(h.dispatcher.stats().dispatched, 1);
}

#[tokio::test]
async fn test_low_confidence_frame_breaks_streak() {
    let detector = ScriptedDetector::new(vec![
        Ok(vec![card(0.9)]),
        Ok(vec![card(0.2)]),
        Ok(vec![card(0.9)]),
    ]);
    let (sink, mut rx) = recording_sink();
    let h = harness(detector, sink);
    let image = png(64, 64);

    for _ in 0..3 {
        let (status, _) = send(&h.app, detect_request("image", &image)).await;
        assert_eq!(status, StatusCode::OK);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(h.engine.counters().count("card"), 1);
}

#[tokio::test]
async fn test_detector_failure_leaves_counters() {
    let detector =
        ScriptedDetector::new(vec![Ok(vec![card(0.9)]), Err("model exploded".to_string())]);
    let (sink, _rx) = recording_sink();
    let h = harness(detector, sink);
    let image = png(64, 64);

    let (status, _) = send(&h.app, detect_request("image", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.engine.counters().count("card"), 1);

    let (status, body) = send(&h.app, detect_request("image", &image)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("model exploded"));
    assert_eq!(h.engine.counters().count("card"), 1);
}

#[tokio::test]
async fn test_backend_failure_does_not_change_response() {
    let detector = ScriptedDetector::always(vec![card(0.5)]);
    let h = harness(detector, Arc::new(FailingSink));
    let image = png(100, 100);

    send(&h.app, detect_request("image", &image)).await;
    let (status, body) = send(&h.app, detect_request("image", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "success", "detections": [{"class": "card", "confidence": 0.5}]})
    );

    for _ in 0..100 {
        if h.dispatcher.stats().failed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.dispatcher.stats().failed, 1);
    assert_eq!(h.dispatcher.stats().delivered, 0);
}

#[tokio::test]
async fn test_upload_over_limit_rejected() {
    let detector = ScriptedDetector::always(Vec::new());
    let (sink, _rx) = recording_sink();
    let h = harness_with_limit(detector.clone(), sink, 1024);

    let (status, body) = send(&h.app, detect_request("image", &vec![7u8; 8 * 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].is_string());
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let detector = ScriptedDetector::always(Vec::new());
    let (sink, _rx) = recording_sink();
    let h = harness(detector, sink);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["detector"], "scripted");
    assert_eq!(body["captures"]["dispatched"], 0);
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let detector = ScriptedDetector::always(Vec::new());
    let (sink, _rx) = recording_sink();
    let h = harness(detector, sink);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/detect")
        .header(header::ORIGIN, "http://kiosk.local")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
