//! Error types for posture classification.
//!
//! Only integration mistakes surface here. Transient sensor noise (a rejected
//! frame, a capture that timed out) is reported through return values such as
//! [`crate::engine::FrameOutcome`] and `Option`, never as an error.

use std::path::PathBuf;

use thiserror::Error;

use crate::validator::ValidationReport;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PostureError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PostureError {
    /// A frame handed to the classifier lacks one of the required joints.
    #[error("missing keypoint '{name}'")]
    MissingKeypoint { name: String },

    /// Keypoint names must be unique within a frame.
    #[error("duplicate keypoint '{name}' in frame")]
    DuplicateKeypoint { name: String },

    /// A frame was rejected where a usable one was mandatory (e.g. a baseline).
    #[error("invalid frame: {0}")]
    InvalidFrame(ValidationReport),

    /// Classification was requested before any baseline was stored.
    #[error("no baseline has been set")]
    NoBaseline,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PostureError {
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingKeypoint { name: name.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
