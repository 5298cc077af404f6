//! Error types for glimpse-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

impl VisionError {
    /// True when the caller supplied bytes we could not read as an image
    pub fn is_input_error(&self) -> bool {
        matches!(self, VisionError::Decode(_))
    }
}
