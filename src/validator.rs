//! Frame validation.
//!
//! A report lists every offending point, not just the first, so the UI can say
//! "right_ear not visible" instead of a generic failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ValidatorConfig;
use crate::pose::{Joint, Kp7Frame, Kp7Name, Point, PoseFrame, Skeleton};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Arity and finite x/y only.
    #[default]
    Lenient,
    /// Also requires visibility and an in-frame position.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    Arity { expected: usize, actual: usize },
    Missing,
    NonFinite,
    LowVisibility { visibility: f64 },
    OutOfFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Offending point; `None` for whole-frame problems such as arity.
    pub point: Option<String>,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    fn at(point: &str, kind: ViolationKind) -> Self {
        Self {
            point: Some(point.to_string()),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.point.as_deref().unwrap_or("frame");
        match &self.kind {
            ViolationKind::Arity { expected, actual } => {
                write!(f, "expected {expected} keypoints, got {actual}")
            }
            ViolationKind::Missing => write!(f, "{name} missing"),
            ViolationKind::NonFinite => write!(f, "{name} invalid coords"),
            ViolationKind::LowVisibility { .. } => write!(f, "{name} not visible"),
            ViolationKind::OutOfFrame => write!(f, "{name} out of frame"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationReport {
    pub reasons: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Names of every point that failed, in input order.
    pub fn failed_points(&self) -> Vec<&str> {
        self.reasons
            .iter()
            .filter_map(|v| v.point.as_deref())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ok");
        }
        f.write_str(&self.messages().join(", "))
    }
}

/// Pure check of keypoint sets against the configured mode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameValidator {
    config: ValidatorConfig,
}

impl FrameValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn lenient() -> Self {
        Self::new(ValidatorConfig {
            mode: ValidationMode::Lenient,
            ..ValidatorConfig::default()
        })
    }

    pub fn strict() -> Self {
        Self::new(ValidatorConfig {
            mode: ValidationMode::Strict,
            ..ValidatorConfig::default()
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates a 6-point classifier frame.
    pub fn validate_frame(&self, frame: &PoseFrame) -> ValidationReport {
        let expected = Joint::ALL.len();
        if frame.len() != expected {
            return arity(expected, frame.len());
        }

        let reasons = Joint::ALL
            .iter()
            .filter_map(|joint| match frame.get(joint.as_str()) {
                None => Some(Violation::at(joint.as_str(), ViolationKind::Missing)),
                Some(kp) => self
                    .check_point(kp.point(), kp.score.unwrap_or(1.0))
                    .map(|kind| Violation::at(joint.as_str(), kind)),
            })
            .collect();
        ValidationReport { reasons }
    }

    /// Validates a 7-point capture frame.
    pub fn validate_kp7(&self, frame: &Kp7Frame) -> ValidationReport {
        let expected = Kp7Name::ALL.len();
        if frame.points.len() != expected {
            return arity(expected, frame.points.len());
        }

        let reasons = Kp7Name::ALL
            .iter()
            .zip(&frame.points)
            .filter_map(|(name, p)| {
                self.check_point(p.point(), p.v)
                    .map(|kind| Violation::at(name.as_str(), kind))
            })
            .collect();
        ValidationReport { reasons }
    }

    /// Validates and, on success, resolves the classifier joints.
    pub fn resolve(&self, frame: &PoseFrame) -> Result<Skeleton, ValidationReport> {
        let report = self.validate_frame(frame);
        match Skeleton::from_frame(frame) {
            // A clean report means all six joints are present.
            Ok(skeleton) if report.is_ok() => Ok(skeleton),
            _ => Err(report),
        }
    }

    fn check_point(&self, p: Point, visibility: f64) -> Option<ViolationKind> {
        if !p.is_finite() {
            return Some(ViolationKind::NonFinite);
        }
        if self.config.mode == ValidationMode::Lenient {
            return None;
        }
        if !visibility.is_finite() || visibility < self.config.min_visibility {
            return Some(ViolationKind::LowVisibility { visibility });
        }
        let lo = -self.config.frame_margin;
        let hi = 1.0 + self.config.frame_margin;
        if p.x < lo || p.x > hi || p.y < lo || p.y > hi {
            return Some(ViolationKind::OutOfFrame);
        }
        None
    }
}

fn arity(expected: usize, actual: usize) -> ValidationReport {
    ValidationReport {
        reasons: vec![Violation {
            point: None,
            kind: ViolationKind::Arity { expected, actual },
        }],
    }
}

/// Anything the capture loop can gate on.
pub trait Validate {
    fn validate_with(&self, validator: &FrameValidator) -> ValidationReport;
}

impl Validate for PoseFrame {
    fn validate_with(&self, validator: &FrameValidator) -> ValidationReport {
        validator.validate_frame(self)
    }
}

impl Validate for Kp7Frame {
    fn validate_with(&self, validator: &FrameValidator) -> ValidationReport {
        validator.validate_kp7(self)
    }
}
