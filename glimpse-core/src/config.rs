//! Configuration for the glimpse relay

use crate::engine::DEFAULT_CAPTURABLE_CLASSES;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Listening socket and upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Remote service that stores captures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Request timeout for capture uploads; `None` keeps the client default
    pub timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_secs: None,
        }
    }
}

/// Object detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to the ONNX model
    pub model_path: PathBuf,
    /// Square model input edge in pixels
    pub input_size: u32,
    /// Detections below this score are dropped by the detector itself
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
    /// Label per class index; empty means "read from model metadata"
    pub class_names: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models").join("best.onnx"),
            input_size: 640,
            confidence_threshold: 0.3,
            iou_threshold: 0.7,
            class_names: Vec::new(),
        }
    }
}

/// Which labels are worth capturing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub capturable_classes: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capturable_classes: DEFAULT_CAPTURABLE_CLASSES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlimpseConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl GlimpseConfig {
    /// Load configuration from a JSON or TOML file.
    ///
    /// The format follows the `.json` / `.toml` extension and falls back to
    /// [`GlimpseConfig::parse`] for anything else.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json(&content),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml(&content),
            _ => Self::parse(&content),
        }
    }

    /// Parse configuration text of unknown format. Text starting with `{` is
    /// JSON, anything else TOML.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim_start().starts_with('{') {
            Self::from_json(content)
        } else {
            Self::from_toml(content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("invalid JSON config: {}", e)))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("invalid TOML config: {}", e)))
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay variables from an arbitrary lookup
    ///
    /// Recognised keys: `PORT`, `GLIMPSE_HOST`, `GLIMPSE_BACKEND_URL`,
    /// `GLIMPSE_MODEL_PATH`, `GLIMPSE_LOG_LEVEL`. Unparseable values are
    /// ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring unparseable PORT value: {}", port),
            }
        }

        if let Some(host) = lookup("GLIMPSE_HOST") {
            self.server.host = host;
        }

        if let Some(url) = lookup("GLIMPSE_BACKEND_URL") {
            self.backend.base_url = url;
        }

        if let Some(model) = lookup("GLIMPSE_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(model);
        }

        if let Some(level) = lookup("GLIMPSE_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port cannot be 0".to_string()));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Validation("server.max_upload_bytes must be > 0".to_string()));
        }

        let url = self.backend.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "backend.base_url must use http or https: '{}'",
                self.backend.base_url
            )));
        }

        if self.backend.timeout_secs == Some(0) {
            return Err(ConfigError::Validation("backend.timeout_secs must be > 0".to_string()));
        }

        if self.detector.input_size == 0 || self.detector.input_size > 4096 {
            return Err(ConfigError::Validation(
                "detector.input_size must be between 1 and 4096".to_string(),
            ));
        }

        let unit = 0.0..=1.0;
        if !unit.contains(&self.detector.confidence_threshold) {
            return Err(ConfigError::Validation(
                "detector.confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !unit.contains(&self.detector.iou_threshold) {
            return Err(ConfigError::Validation(
                "detector.iou_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.capture.capturable_classes.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "capture.capturable_classes cannot contain empty labels".to_string(),
            ));
        }

        Ok(())
    }

    /// Filter directive for the log subscriber
    pub fn log_filter(&self) -> &str {
        if self.log_level.trim().is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
