use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PostureError, Result};
use crate::validator::ValidationMode;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierThresholds,
    pub engine: EngineConfig,
    pub validator: ValidatorConfig,
    pub capture: CaptureConfig,
}

/// Rule thresholds. Each `*_span` is the distance past the threshold at which
/// the score saturates at 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub shoulder_tilt: f64,
    pub shoulder_tilt_span: f64,
    pub neck_tilt_deg: f64,
    pub neck_tilt_span: f64,
    pub forward_head: f64,
    pub forward_head_span: f64,
    pub torso_reduce: f64,
    pub torso_reduce_span: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            shoulder_tilt: 0.08,
            shoulder_tilt_span: 0.25,
            neck_tilt_deg: 12.0,
            neck_tilt_span: 20.0,
            forward_head: 0.18,
            forward_head_span: 0.30,
            torso_reduce: 0.12,
            torso_reduce_span: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Labels kept for the majority vote.
    pub smooth_window: usize,
    /// Frames averaged into a baseline when none was supplied.
    pub calibration_frames: usize,
    /// Keypoint EMA weight for new samples; `None` disables jitter filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_alpha: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            smooth_window: 10,
            calibration_frames: 30,
            jitter_alpha: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub mode: ValidationMode,
    pub min_visibility: f64,
    /// Allowed overshoot past the normalized [0, 1] frame in strict mode.
    pub frame_margin: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Lenient,
            min_visibility: 0.5,
            frame_margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1500,
            poll_interval_ms: 60,
        }
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PostureError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| PostureError::ConfigWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        for (name, span) in [
            ("shoulder_tilt_span", c.shoulder_tilt_span),
            ("neck_tilt_span", c.neck_tilt_span),
            ("forward_head_span", c.forward_head_span),
            ("torso_reduce_span", c.torso_reduce_span),
        ] {
            if !(span > 0.0) {
                return Err(PostureError::invalid_config(format!(
                    "classifier.{name} must be > 0, got {span}"
                )));
            }
        }

        if self.engine.smooth_window == 0 {
            return Err(PostureError::invalid_config("engine.smooth_window must be > 0"));
        }
        if self.engine.calibration_frames == 0 {
            return Err(PostureError::invalid_config(
                "engine.calibration_frames must be > 0",
            ));
        }
        if let Some(alpha) = self.engine.jitter_alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(PostureError::invalid_config(format!(
                    "engine.jitter_alpha must be in (0, 1], got {alpha}"
                )));
            }
        }

        let v = self.validator.min_visibility;
        if !(0.0..=1.0).contains(&v) {
            return Err(PostureError::invalid_config(format!(
                "validator.min_visibility must be in [0, 1], got {v}"
            )));
        }

        if self.capture.poll_interval_ms == 0 {
            return Err(PostureError::invalid_config(
                "capture.poll_interval_ms must be > 0",
            ));
        }
        Ok(())
    }
}
