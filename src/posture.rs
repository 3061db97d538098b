use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierThresholds;
use crate::error::{PostureError, Result};
use crate::features::{extract_features, FeatureSet};
use crate::pose::{PoseFrame, Skeleton};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureLabel {
    Normal,
    NeckTilt,
    ForwardHead,
    ShoulderTilt,
    LeaningBack,
}

impl PostureLabel {
    pub const ALL: [PostureLabel; 5] = [
        PostureLabel::Normal,
        PostureLabel::NeckTilt,
        PostureLabel::ForwardHead,
        PostureLabel::ShoulderTilt,
        PostureLabel::LeaningBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::NeckTilt => "neck_tilt",
            Self::ForwardHead => "forward_head",
            Self::ShoulderTilt => "shoulder_tilt",
            Self::LeaningBack => "leaning_back",
        }
    }
}

impl fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostureLabel {
    type Err = PostureError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| PostureError::invalid_request(format!("unknown posture label '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: PostureLabel,
    /// Linear ramp past the triggering threshold, clamped to [0, 1].
    pub score: f64,
    pub metrics: FeatureSet,
}

/// Anything that maps a baseline/current pair to a label.
pub trait PostureModel {
    fn predict(&self, baseline: &Skeleton, current: &Skeleton) -> ClassificationResult;
}

/// Priority-ordered threshold rules. Stateless, so one instance can serve any
/// number of baselines.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuleClassifier {
    thresholds: ClassifierThresholds,
}

impl RuleClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    /// Applies the rules in priority order: shoulder tilt, neck tilt,
    /// forward head, leaning back. Comparisons are strict, so a value sitting
    /// exactly on a threshold falls through to the next rule.
    pub fn decide(&self, m: &FeatureSet) -> (PostureLabel, f64) {
        let t = &self.thresholds;
        let tilt = m.shoulder_tilt.abs();

        if tilt > t.shoulder_tilt {
            return (PostureLabel::ShoulderTilt, ramp(tilt, t.shoulder_tilt, t.shoulder_tilt_span));
        }
        if m.abs_neck_tilt_deg > t.neck_tilt_deg {
            return (
                PostureLabel::NeckTilt,
                ramp(m.abs_neck_tilt_deg, t.neck_tilt_deg, t.neck_tilt_span),
            );
        }
        if m.fwd_head_score > t.forward_head {
            return (
                PostureLabel::ForwardHead,
                ramp(m.fwd_head_score, t.forward_head, t.forward_head_span),
            );
        }
        if m.torso_reduce > t.torso_reduce {
            return (
                PostureLabel::LeaningBack,
                ramp(m.torso_reduce, t.torso_reduce, t.torso_reduce_span),
            );
        }
        (PostureLabel::Normal, 0.0)
    }

    pub fn classify(&self, baseline: &Skeleton, current: &Skeleton) -> ClassificationResult {
        let metrics = extract_features(baseline, current);
        let (label, score) = self.decide(&metrics);
        ClassificationResult {
            label,
            score,
            metrics,
        }
    }

    /// Classifies raw frames. A frame missing one of the six joints means the
    /// caller skipped validation, so it is an error rather than a soft reject.
    pub fn classify_frames(
        &self,
        baseline: &PoseFrame,
        current: &PoseFrame,
    ) -> Result<ClassificationResult> {
        let base = Skeleton::from_frame(baseline)?;
        let cur = Skeleton::from_frame(current)?;
        Ok(self.classify(&base, &cur))
    }
}

impl PostureModel for RuleClassifier {
    fn predict(&self, baseline: &Skeleton, current: &Skeleton) -> ClassificationResult {
        self.classify(baseline, current)
    }
}

fn ramp(value: f64, threshold: f64, span: f64) -> f64 {
    ((value - threshold) / span).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, Point};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn features(shoulder_tilt: f64, neck: f64, fwd: f64, torso: f64) -> FeatureSet {
        FeatureSet {
            shoulder_tilt,
            abs_neck_tilt_deg: neck,
            fwd_head_score: fwd,
            torso_reduce: torso,
            shoulder_width: 0.2,
            shoulder_width_base: 0.2,
        }
    }

    fn upright() -> Skeleton {
        Skeleton {
            head: Point::new(0.5, 0.2),
            neck: Point::new(0.5, 0.4),
            shoulder_l: Point::new(0.4, 0.4),
            shoulder_r: Point::new(0.6, 0.4),
            hip_l: Point::new(0.42, 0.8),
            hip_r: Point::new(0.58, 0.8),
        }
    }

    #[test]
    fn values_on_a_threshold_fall_through() {
        let c = RuleClassifier::default();
        assert_eq!(c.decide(&features(0.08, 0.0, 0.0, 0.0)).0, PostureLabel::Normal);
        assert_eq!(c.decide(&features(-0.08, 0.0, 0.0, 0.0)).0, PostureLabel::Normal);
        assert_eq!(c.decide(&features(0.0, 12.0, 0.0, 0.0)).0, PostureLabel::Normal);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.18, 0.0)).0, PostureLabel::Normal);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.0, 0.12)).0, PostureLabel::Normal);

        // on one threshold, past the next one down
        assert_eq!(c.decide(&features(0.08, 13.0, 0.0, 0.0)).0, PostureLabel::NeckTilt);
        assert_eq!(c.decide(&features(0.0, 12.0, 0.2, 0.0)).0, PostureLabel::ForwardHead);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.18, 0.13)).0, PostureLabel::LeaningBack);
    }

    #[test]
    fn just_past_each_threshold_triggers() {
        let c = RuleClassifier::default();
        let eps = 1e-9;
        assert_eq!(c.decide(&features(0.08 + eps, 0.0, 0.0, 0.0)).0, PostureLabel::ShoulderTilt);
        assert_eq!(c.decide(&features(0.0, 12.0 + eps, 0.0, 0.0)).0, PostureLabel::NeckTilt);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.18 + eps, 0.0)).0, PostureLabel::ForwardHead);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.0, 0.12 + eps)).0, PostureLabel::LeaningBack);
    }

    #[test]
    fn shoulder_tilt_outranks_neck_tilt() {
        let mut cur = upright();
        cur.shoulder_r.y = 0.45;
        cur.head = Point::new(0.7, 0.25);
        let r = RuleClassifier::default().classify(&upright(), &cur);
        assert!(r.metrics.shoulder_tilt.abs() > 0.08);
        assert!(r.metrics.abs_neck_tilt_deg > 12.0);
        assert_eq!(r.label, PostureLabel::ShoulderTilt);
    }

    #[test]
    fn score_formulas() {
        let c = RuleClassifier::default();
        assert_abs_diff_eq!(c.decide(&features(-0.205, 0.0, 0.0, 0.0)).1, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c.decide(&features(0.0, 22.0, 0.0, 0.0)).1, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c.decide(&features(0.0, 0.0, 0.33, 0.0)).1, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c.decide(&features(0.0, 0.0, 0.0, 0.245)).1, 0.5, epsilon = 1e-12);
        assert_eq!(c.decide(&features(0.0, 0.0, 0.0, 0.0)).1, 0.0);
    }

    #[test]
    fn thresholds_are_tunable() {
        let c = RuleClassifier::new(ClassifierThresholds {
            neck_tilt_deg: 30.0,
            ..ClassifierThresholds::default()
        });
        assert_eq!(c.decide(&features(0.0, 20.0, 0.0, 0.0)).0, PostureLabel::Normal);
    }

    #[test]
    fn classify_frames_requires_all_joints() {
        let full = upright().to_frame(0.0);
        let partial = PoseFrame::new(0.0, vec![Keypoint::new("head", 0.5, 0.2)]).unwrap();
        let c = RuleClassifier::default();
        assert!(c.classify_frames(&full, &full).is_ok());
        let err = c.classify_frames(&full, &partial).unwrap_err();
        assert!(matches!(err, PostureError::MissingKeypoint { .. }));
    }

    #[test]
    fn labels_parse_and_print() {
        for label in PostureLabel::ALL {
            assert_eq!(label.to_string().parse::<PostureLabel>().unwrap(), label);
        }
        assert!("slouching".parse::<PostureLabel>().is_err());
        assert_eq!(
            serde_json::to_string(&PostureLabel::LeaningBack).unwrap(),
            "\"leaning_back\""
        );
    }

    proptest! {
        #[test]
        fn score_is_monotonic_and_saturates(a in 0.0801f64..1.0, b in 0.0801f64..1.0) {
            let c = RuleClassifier::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (l1, s1) = c.decide(&features(lo, 0.0, 0.0, 0.0));
            let (l2, s2) = c.decide(&features(hi, 0.0, 0.0, 0.0));
            prop_assert_eq!(l1, PostureLabel::ShoulderTilt);
            prop_assert_eq!(l2, PostureLabel::ShoulderTilt);
            prop_assert!(s1 <= s2);
            prop_assert!((0.0..=1.0).contains(&s2));
            if hi >= 0.34 {
                prop_assert_eq!(s2, 1.0);
            }
        }

        #[test]
        fn classification_is_deterministic(dy in -0.1f64..0.1, dx in -0.1f64..0.1) {
            let mut cur = upright();
            cur.shoulder_r.y += dy;
            cur.head.x += dx;
            let c = RuleClassifier::default();
            let a = c.classify(&upright(), &cur);
            let b = c.classify(&upright(), &cur);
            prop_assert_eq!(a.label, b.label);
            prop_assert_eq!(a.score.to_bits(), b.score.to_bits());
        }
    }
}
