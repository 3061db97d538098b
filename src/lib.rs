//! Posture classification from webcam pose keypoints.
//!
//! A pose estimator upstream produces per-frame keypoints; this crate turns a
//! stream of them into posture labels relative to a personal baseline:
//!
//! - [`pose`]: keypoint frames and the joints the rules need
//! - [`validator`]: completeness and plausibility gating
//! - [`features`]: scale-invariant geometric features
//! - [`posture`]: the rule classifier
//! - [`engine`]: streaming auto-calibration and majority smoothing
//! - [`capture`]: time-bounded baseline capture
//! - [`service`]: request/response wrapper around the classifier

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod pose;
pub mod posture;
pub mod service;
pub mod validator;

pub use capture::{capture_stable, FrameSource, LatestFrame};
pub use config::Config;
pub use engine::{EngineState, FrameOutcome, LabelCounts, StreamingEngine};
pub use error::{PostureError, Result};
pub use events::{EventSink, PostureEvent};
pub use features::{extract_features, FeatureSet};
pub use pose::{Keypoint, Kp7Frame, PoseFrame, Skeleton};
pub use posture::{ClassificationResult, PostureLabel, PostureModel, RuleClassifier};
pub use service::PredictionService;
pub use validator::{FrameValidator, ValidationReport};
