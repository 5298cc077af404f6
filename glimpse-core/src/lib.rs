//! glimpse-core: detection data model and capture decision engine
//!
//! Turns a stream of independent per-image detections into a debounced
//! stream of capture events. A class has to be seen qualifying in
//! consecutive evaluations before a capture fires.

pub mod config;
pub mod engine;
pub mod error;
pub mod types;

pub use config::GlimpseConfig;
pub use engine::{CaptureEngine, CapturePolicy, ClassCounters};
pub use error::ConfigError;
pub use types::{Action, BoundingBox, CaptureRegion, Detection, ImageDimensions};
