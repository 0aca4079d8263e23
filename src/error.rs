use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Json deser error: {0}")]
    JsonDeserError(#[from] serde_json::Error),
    #[error("Hugging Face Hub error: {0}")]
    ApiError(#[from] hf_hub::api::sync::ApiError),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Capability(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an upload is rejected before any model runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("no image data provided")]
    EmptyImage,
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("image is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("decoded image has zero size ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("could not decode image: {0}")]
    Decode(String),
}

impl InputError {
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyImage | Self::EmptyPrompt => {
                "Please provide both an image and a prompt.".to_string()
            }
            Self::TooLarge { limit, .. } => format!(
                "The image is too large. Please upload an image under {} MB.",
                limit / (1024 * 1024)
            ),
            Self::ZeroDimension { .. } | Self::Decode(_) => {
                "The uploaded file could not be read as an image.".to_string()
            }
        }
    }
}

/// Every way a single `segment` call can end without artifacts.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("model not loaded: {0}")]
    CapabilityUnavailable(String),
    #[error("detector found no box for the prompt")]
    NoDetection,
    #[error("segmenter produced no mask under box or point prompts")]
    NoMask,
    #[error("failed to persist artifacts: {0}")]
    Persistence(String),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl SegmentError {
    /// Text suitable for showing to the person who made the request.
    pub fn user_message(&self) -> String {
        match self {
            Self::Input(e) => e.user_message(),
            Self::CapabilityUnavailable(_) => {
                "The segmentation models are not loaded. Please try again later.".to_string()
            }
            Self::NoDetection | Self::NoMask => {
                "Could not detect the object. Please try a different prompt.".to_string()
            }
            Self::Persistence(_) | Self::Unexpected(_) => {
                "An error occurred while processing the image.".to_string()
            }
        }
    }

    /// "Nothing matched" outcomes that are not faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NoDetection | Self::NoMask)
    }
}
