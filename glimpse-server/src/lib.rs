//! glimpse-server: HTTP surface and capture forwarding
//!
//! `POST /detect` runs the detector over an uploaded image, feeds the result
//! through the capture engine and hands captures to per-class forwarding
//! lanes. Forwarding is best effort and never changes the detection response.

pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod http;

pub use dispatcher::{CaptureDispatcher, DispatchSnapshot, DispatchStats};
pub use error::{ApiError, ForwardError};
pub use forwarder::{CaptureJob, CapturePayload, CaptureSink, Forwarder, HttpCaptureSink, SinkAck};
pub use http::{create_router, ApiState};
