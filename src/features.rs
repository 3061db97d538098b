//! Baseline-relative geometric features.
//!
//! Every length is divided by a shoulder width so the features do not depend
//! on how far the subject sits from the camera.

use serde::{Deserialize, Serialize};

use crate::pose::{Joint, Point, Skeleton};

/// Floor for the shoulder-width normalizer.
pub const WIDTH_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Right-minus-left shoulder height over current shoulder width.
    /// Positive means the right shoulder is lower.
    pub shoulder_tilt: f64,
    /// Angle of the neck→head vector from vertical, degrees, magnitude only.
    pub abs_neck_tilt_deg: f64,
    /// Forward-head proxy: lateral head shift or upward head shift over the
    /// neck, relative to baseline.
    pub fwd_head_score: f64,
    /// Shortening of the neck→hip vertical span relative to baseline.
    /// Positive reads as reclining.
    pub torso_reduce: f64,
    pub shoulder_width: f64,
    pub shoulder_width_base: f64,
}

pub fn shoulder_width(skeleton: &Skeleton) -> f64 {
    skeleton
        .shoulder_l
        .distance(skeleton.shoulder_r)
        .max(WIDTH_EPSILON)
}

/// Computes the feature set of `current` against `base`. Pure and deterministic.
pub fn extract_features(base: &Skeleton, current: &Skeleton) -> FeatureSet {
    let width_base = shoulder_width(base);
    let width = shoulder_width(current);

    let shoulder_tilt = (current.shoulder_r.y - current.shoulder_l.y) / width;

    let dx_now = current.head.x - current.neck.x;
    let dy_now = current.head.y - current.neck.y;
    let neck_tilt_deg = dx_now.atan2(-dy_now).to_degrees();

    // Heuristic: a sideways head and a head risen off the neck both count.
    let dx_base = base.head.x - base.neck.x;
    let dy_base = base.head.y - base.neck.y;
    let head_delta_x = (dx_now - dx_base) / width;
    let head_delta_y = (dy_now - dy_base) / width;
    let fwd_head_score = head_delta_x.abs().max((-head_delta_y).max(0.0));

    let torso_base = (base.neck.y - base.hip_mid().y).abs();
    let torso_now = (current.neck.y - current.hip_mid().y).abs();
    let torso_reduce = (torso_base - torso_now) / width_base;

    FeatureSet {
        shoulder_tilt,
        abs_neck_tilt_deg: neck_tilt_deg.abs(),
        fwd_head_score,
        torso_reduce,
        shoulder_width: width,
        shoulder_width_base: width_base,
    }
}

/// Dimension of [`feature_vector`].
pub const FEATURE_VECTOR_LEN: usize = Joint::ALL.len() * 3 + 3;

/// Flat input for learned models: per joint `(dx, dy, |d|)` over the baseline
/// shoulder width, then the current shoulder, hip and neck line angles in
/// radians.
pub fn feature_vector(base: &Skeleton, current: &Skeleton) -> [f64; FEATURE_VECTOR_LEN] {
    let width = shoulder_width(base);
    let mut out = [0.0; FEATURE_VECTOR_LEN];

    for (i, joint) in Joint::ALL.iter().enumerate() {
        let b = base.point(*joint);
        let c = current.point(*joint);
        let (dx, dy) = (c.x - b.x, c.y - b.y);
        out[i * 3] = dx / width;
        out[i * 3 + 1] = dy / width;
        out[i * 3 + 2] = dx.hypot(dy) / width;
    }

    let angle = |a: Point, b: Point| (b.y - a.y).atan2(b.x - a.x);
    let tail = Joint::ALL.len() * 3;
    out[tail] = angle(current.shoulder_l, current.shoulder_r);
    out[tail + 1] = angle(current.hip_l, current.hip_r);
    out[tail + 2] = angle(current.neck, current.head);
    out
}

/// Exponential moving average over skeleton coordinates, for keypoint jitter.
#[derive(Debug, Clone)]
pub struct KeypointEma {
    alpha: f64,
    state: Option<Skeleton>,
}

impl KeypointEma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    pub fn next(&mut self, sample: &Skeleton) -> Skeleton {
        let Some(prev) = self.state.as_mut() else {
            self.state = Some(*sample);
            return *sample;
        };
        for joint in Joint::ALL {
            let s = sample.point(joint);
            let p = prev.point_mut(joint);
            p.x = p.x * (1.0 - self.alpha) + s.x * self.alpha;
            p.y = p.y * (1.0 - self.alpha) + s.y * self.alpha;
        }
        *prev
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}
