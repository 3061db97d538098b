//! Streaming engine: auto-calibration, per-frame classification and majority
//! smoothing.
//!
//! The engine is either uncalibrated (collecting frames toward an averaged
//! baseline) or calibrated (classifying each frame against the baseline).
//! All mutation goes through `&mut self` transitions; observers get a
//! [`watch`] receiver or a borrowed snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, EngineConfig};
use crate::error::{PostureError, Result};
use crate::events::PostureEvent;
use crate::features::{FeatureSet, KeypointEma};
use crate::pose::{Keypoint, PoseFrame, Skeleton};
use crate::posture::{ClassificationResult, PostureLabel, PostureModel, RuleClassifier};
use crate::validator::{FrameValidator, ValidationReport};

/// Per-label occurrence counter. Every label is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelCounts(BTreeMap<PostureLabel, u64>);

impl Default for LabelCounts {
    fn default() -> Self {
        Self(PostureLabel::ALL.iter().map(|&l| (l, 0)).collect())
    }
}

impl LabelCounts {
    pub fn get(&self, label: PostureLabel) -> u64 {
        self.0.get(&label).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, label: PostureLabel) {
        *self.0.entry(label).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PostureLabel, u64)> + '_ {
        self.0.iter().map(|(&l, &n)| (l, n))
    }
}

impl FromIterator<PostureLabel> for LabelCounts {
    fn from_iter<I: IntoIterator<Item = PostureLabel>>(iter: I) -> Self {
        let mut counts = Self::default();
        for label in iter {
            counts.increment(label);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub ready: bool,
    /// Smoothed (majority) label.
    pub label: PostureLabel,
    /// Score of the most recent raw classification, not smoothed.
    pub score: f64,
    /// Raw classification counts since the last reset.
    pub counts: LabelCounts,
    pub metrics: Option<FeatureSet>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            ready: false,
            label: PostureLabel::Normal,
            score: 0.0,
            counts: LabelCounts::default(),
            metrics: None,
        }
    }
}

/// Fixed-capacity FIFO of recent labels with a majority vote.
#[derive(Debug, Clone)]
pub struct MajorityWindow {
    capacity: usize,
    labels: VecDeque<PostureLabel>,
}

impl MajorityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            labels: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, label: PostureLabel) {
        self.labels.push_back(label);
        if self.labels.len() > self.capacity {
            self.labels.pop_front();
        }
    }

    /// Most frequent label. On a tie, the label that first appears in the
    /// window wins. An empty window reads as `Normal`.
    pub fn majority(&self) -> PostureLabel {
        let mut tally: Vec<(PostureLabel, usize)> = Vec::with_capacity(PostureLabel::ALL.len());
        for &label in &self.labels {
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => tally.push((label, 1)),
            }
        }

        let mut best = PostureLabel::Normal;
        let mut best_n = 0;
        for (label, n) in tally {
            if n > best_n {
                best = label;
                best_n = n;
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}

/// What happened to one pushed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Intake is switched off; nothing changed.
    Disabled,
    /// The frame failed validation and was skipped.
    Rejected(ValidationReport),
    /// Buffered toward auto-calibration.
    Calibrating { collected: usize, needed: usize },
    /// This frame completed auto-calibration.
    Calibrated,
    Classified {
        raw: ClassificationResult,
        /// Smoothed label emitted with this frame.
        label: PostureLabel,
        event: PostureEvent,
    },
}

impl FrameOutcome {
    pub fn event(&self) -> Option<&PostureEvent> {
        match self {
            Self::Classified { event, .. } => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Baseline {
    frame: PoseFrame,
    skeleton: Skeleton,
}

pub struct StreamingEngine<M = RuleClassifier> {
    model: M,
    validator: FrameValidator,
    config: EngineConfig,
    enabled: bool,
    baseline: Option<Baseline>,
    calibration: Vec<PoseFrame>,
    window: MajorityWindow,
    jitter: Option<KeypointEma>,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
}

impl StreamingEngine<RuleClassifier> {
    pub fn new(config: &Config) -> Self {
        Self::with_model(
            RuleClassifier::new(config.classifier),
            FrameValidator::new(config.validator),
            config.engine,
        )
    }
}

impl<M: PostureModel> StreamingEngine<M> {
    pub fn with_model(model: M, validator: FrameValidator, config: EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(EngineState::default());
        Self {
            model,
            validator,
            config,
            enabled: true,
            baseline: None,
            calibration: Vec::with_capacity(config.calibration_frames),
            window: MajorityWindow::new(config.smooth_window),
            jitter: config.jitter_alpha.map(KeypointEma::new),
            state: EngineState::default(),
            state_tx,
        }
    }

    /// Feeds one frame. Frames must arrive in capture order.
    pub fn push_frame(&mut self, frame: &PoseFrame) -> FrameOutcome {
        if !self.enabled {
            return FrameOutcome::Disabled;
        }

        let skeleton = match self.validator.resolve(frame) {
            Ok(skeleton) => skeleton,
            Err(report) => {
                debug!(ts = frame.ts(), %report, "frame rejected");
                return FrameOutcome::Rejected(report);
            }
        };

        let Some(baseline) = &self.baseline else {
            return self.collect_calibration(frame);
        };

        let current = match &mut self.jitter {
            Some(ema) => ema.next(&skeleton),
            None => skeleton,
        };
        let raw = self.model.predict(&baseline.skeleton, &current);

        self.window.push(raw.label);
        let label = self.window.majority();

        self.state.ready = true;
        self.state.label = label;
        self.state.score = raw.score;
        self.state.counts.increment(raw.label);
        self.state.metrics = Some(raw.metrics);
        self.publish();

        FrameOutcome::Classified {
            raw,
            label,
            event: PostureEvent {
                ts: frame.ts(),
                label,
                score: raw.score,
            },
        }
    }

    /// Installs `frame` as the baseline, skipping auto-calibration.
    pub fn set_baseline(&mut self, frame: PoseFrame) -> Result<()> {
        let skeleton = self
            .validator
            .resolve(&frame)
            .map_err(PostureError::InvalidFrame)?;

        info!(ts = frame.ts(), "baseline set");
        self.baseline = Some(Baseline { frame, skeleton });
        self.reset_buffers();
        self.state.ready = true;
        self.publish();
        Ok(())
    }

    /// Drops the baseline; the next frames start a fresh calibration.
    pub fn clear_baseline(&mut self) {
        info!("baseline cleared");
        self.baseline = None;
        self.reset_buffers();
        self.state.ready = false;
        self.publish();
    }

    /// Zeroes the occurrence counters. Calibration and smoothing are untouched.
    pub fn reset_counts(&mut self) {
        self.state.counts = LabelCounts::default();
        self.publish();
    }

    /// Gates frame intake. Disabling does not reset anything.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn baseline(&self) -> Option<&PoseFrame> {
        self.baseline.as_ref().map(|b| &b.frame)
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// `(collected, needed)` toward auto-calibration.
    pub fn calibration_progress(&self) -> (usize, usize) {
        (self.calibration.len(), self.config.calibration_frames)
    }

    pub fn window(&self) -> &MajorityWindow {
        &self.window
    }

    fn collect_calibration(&mut self, frame: &PoseFrame) -> FrameOutcome {
        self.calibration.push(frame.clone());
        let needed = self.config.calibration_frames;
        let collected = self.calibration.len();

        if collected < needed {
            debug!(collected, needed, "calibrating");
            self.state.ready = false;
            self.publish();
            return FrameOutcome::Calibrating { collected, needed };
        }

        let frames = std::mem::take(&mut self.calibration);
        let averaged = average_frames(&frames, now_ms())
            .ok_or_else(|| PostureError::invalid_request("empty calibration buffer"))
            .and_then(|f| Skeleton::from_frame(&f).map(|s| (f, s)));

        match averaged {
            Ok((frame, skeleton)) => {
                info!(frames = frames.len(), "auto-calibration complete");
                self.baseline = Some(Baseline { frame, skeleton });
                self.reset_buffers();
                self.state.ready = true;
                self.publish();
                FrameOutcome::Calibrated
            }
            Err(err) => {
                warn!(%err, "calibration average unusable, restarting");
                FrameOutcome::Calibrating {
                    collected: 0,
                    needed,
                }
            }
        }
    }

    fn reset_buffers(&mut self) {
        self.window.clear();
        self.calibration.clear();
        if let Some(ema) = &mut self.jitter {
            ema.reset();
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

/// Coordinate-wise mean per keypoint name, over the names of the first frame.
/// Depth and score are averaged over the frames that carry them.
pub fn average_frames(frames: &[PoseFrame], ts: f64) -> Option<PoseFrame> {
    let first = frames.first()?;

    let keypoints = first
        .keypoints()
        .iter()
        .map(|template| {
            let samples: Vec<&Keypoint> =
                frames.iter().filter_map(|f| f.get(&template.name)).collect();
            let n = samples.len() as f64;
            let mean_of = |values: Vec<f64>| {
                (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
            };

            Keypoint {
                name: template.name.clone(),
                x: samples.iter().map(|k| k.x).sum::<f64>() / n,
                y: samples.iter().map(|k| k.y).sum::<f64>() / n,
                z: mean_of(samples.iter().filter_map(|k| k.z).collect()),
                score: mean_of(samples.iter().filter_map(|k| k.score).collect()),
            }
        })
        .collect();

    // Names come from one already-unique frame.
    PoseFrame::new(ts, keypoints).ok()
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Joint, Point};
    use approx::assert_abs_diff_eq;

    use crate::posture::PostureLabel::{Normal as A, ShoulderTilt as B};

    fn neutral() -> Skeleton {
        Skeleton {
            head: Point::new(0.5, 0.2),
            neck: Point::new(0.5, 0.4),
            shoulder_l: Point::new(0.4, 0.4),
            shoulder_r: Point::new(0.6, 0.4),
            hip_l: Point::new(0.42, 0.8),
            hip_r: Point::new(0.58, 0.8),
        }
    }

    fn tilted() -> Skeleton {
        let mut s = neutral();
        s.shoulder_r.y = 0.45;
        s
    }

    fn engine(calibration_frames: usize) -> StreamingEngine {
        let mut config = Config::default();
        config.engine.calibration_frames = calibration_frames;
        StreamingEngine::new(&config)
    }

    fn calibrated() -> StreamingEngine {
        let mut e = engine(30);
        e.set_baseline(neutral().to_frame(0.0)).unwrap();
        e
    }

    #[test]
    fn majority_prefers_most_frequent() {
        let mut w = MajorityWindow::new(10);
        for l in [A, A, A, B, B, B, B, A, A, A] {
            w.push(l);
        }
        assert_eq!(w.majority(), A);
    }

    #[test]
    fn majority_tie_goes_to_first_seen() {
        let mut w = MajorityWindow::new(10);
        for l in [B, A, A, B] {
            w.push(l);
        }
        assert_eq!(w.majority(), B);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut w = MajorityWindow::new(3);
        for l in [B, B, A, A] {
            w.push(l);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.majority(), A);
        assert_eq!(MajorityWindow::new(3).majority(), PostureLabel::Normal);
    }

    #[test]
    fn calibration_needs_exactly_n_frames() {
        let mut e = engine(30);
        for i in 0..29 {
            let out = e.push_frame(&neutral().to_frame(i as f64));
            assert!(matches!(
                out,
                FrameOutcome::Calibrating { collected, needed: 30 } if collected == i as usize + 1
            ));
        }
        assert!(!e.state().ready);
        assert!(!e.is_calibrated());

        assert_eq!(e.push_frame(&neutral().to_frame(29.0)), FrameOutcome::Calibrated);
        assert!(e.state().ready);
        assert_eq!(e.calibration_progress(), (0, 30));

        let base = e.baseline().unwrap();
        for joint in Joint::ALL {
            let p = base.joint(joint).unwrap();
            let q = neutral().point(joint);
            assert_abs_diff_eq!(p.x, q.x, epsilon = 1e-12);
            assert_abs_diff_eq!(p.y, q.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn calibration_averages_coordinates() {
        let mut e = engine(2);
        e.push_frame(&neutral().to_frame(0.0));
        e.push_frame(&tilted().to_frame(1.0));
        let y = e.baseline().unwrap().joint(Joint::ShoulderR).unwrap().y;
        assert_abs_diff_eq!(y, 0.425, epsilon = 1e-12);
    }

    #[test]
    fn invalid_frames_do_not_count_toward_calibration() {
        let mut e = engine(2);
        let mut bad = neutral();
        bad.head.x = f64::NAN;
        assert!(matches!(e.push_frame(&bad.to_frame(0.0)), FrameOutcome::Rejected(_)));
        assert_eq!(e.calibration_progress(), (0, 2));
    }

    #[test]
    fn emits_smoothed_label_with_instant_score() {
        let mut e = calibrated();
        for ts in 0..6 {
            e.push_frame(&neutral().to_frame(ts as f64));
        }
        let out = e.push_frame(&tilted().to_frame(6.0));
        let FrameOutcome::Classified { raw, label, event } = out else {
            panic!("expected classification");
        };
        assert_eq!(raw.label, PostureLabel::ShoulderTilt);
        assert_eq!(label, PostureLabel::Normal);
        assert!(raw.score > 0.0);
        assert_eq!(e.state().score, raw.score);
        assert_eq!(event.label, PostureLabel::Normal);
        assert_eq!(event.ts, 6.0);
    }

    #[test]
    fn counts_track_raw_labels() {
        let mut e = calibrated();
        for ts in 0..5 {
            e.push_frame(&neutral().to_frame(ts as f64));
        }
        e.push_frame(&tilted().to_frame(5.0));
        let counts = &e.state().counts;
        assert_eq!(counts.get(PostureLabel::Normal), 5);
        assert_eq!(counts.get(PostureLabel::ShoulderTilt), 1);
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn reset_counts_keeps_window_and_baseline() {
        let mut e = calibrated();
        for ts in 0..4 {
            e.push_frame(&tilted().to_frame(ts as f64));
        }
        e.reset_counts();
        assert_eq!(e.state().counts.total(), 0);
        assert_eq!(e.window().len(), 4);
        assert!(e.state().ready);
    }

    #[test]
    fn set_baseline_clears_window_and_calibration() {
        let mut e = engine(30);
        for ts in 0..5 {
            e.push_frame(&neutral().to_frame(ts as f64));
        }
        e.set_baseline(neutral().to_frame(9.0)).unwrap();
        assert!(e.state().ready);
        assert_eq!(e.calibration_progress().0, 0);

        let mut raised = neutral();
        raised.head.y = 0.1;
        let out = e.push_frame(&raised.to_frame(10.0));
        assert_eq!(out.event().unwrap().label, PostureLabel::ForwardHead);

        e.set_baseline(raised.to_frame(11.0)).unwrap();
        assert!(e.window().is_empty());

        // head height is measured against the baseline, so the raised pose is now neutral
        let out = e.push_frame(&raised.to_frame(12.0));
        assert_eq!(out.event().unwrap().label, PostureLabel::Normal);
        assert_eq!(e.window().len(), 1);

        // shoulder tilt is absolute and survives a re-baseline
        e.set_baseline(tilted().to_frame(13.0)).unwrap();
        let out = e.push_frame(&tilted().to_frame(14.0));
        assert_eq!(out.event().unwrap().label, PostureLabel::ShoulderTilt);
    }

    #[test]
    fn set_baseline_rejects_incomplete_frames() {
        let mut e = engine(30);
        let frame = PoseFrame::new(0.0, vec![Keypoint::new("head", 0.5, 0.2)]).unwrap();
        assert!(matches!(e.set_baseline(frame), Err(PostureError::InvalidFrame(_))));
        assert!(!e.is_calibrated());
    }

    #[test]
    fn clear_baseline_returns_to_calibration() {
        let mut e = calibrated();
        e.push_frame(&tilted().to_frame(0.0));
        e.clear_baseline();
        assert!(!e.state().ready);
        assert!(e.window().is_empty());
        assert_eq!(e.state().counts.total(), 1);
        assert!(matches!(
            e.push_frame(&neutral().to_frame(1.0)),
            FrameOutcome::Calibrating { collected: 1, .. }
        ));
    }

    #[test]
    fn disabled_engine_ignores_frames() {
        let mut e = calibrated();
        e.push_frame(&tilted().to_frame(0.0));
        let before = e.state().clone();

        e.set_enabled(false);
        assert_eq!(e.push_frame(&neutral().to_frame(1.0)), FrameOutcome::Disabled);
        assert_eq!(e.state(), &before);
        assert_eq!(e.window().len(), 1);

        e.set_enabled(true);
        assert!(e.push_frame(&neutral().to_frame(2.0)).event().is_some());
    }

    #[test]
    fn subscribers_see_transitions() {
        let mut e = engine(1);
        let mut rx = e.subscribe();
        assert!(!rx.borrow_and_update().ready);

        e.push_frame(&neutral().to_frame(0.0));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().ready);

        e.push_frame(&tilted().to_frame(1.0));
        assert_eq!(rx.borrow().counts.get(PostureLabel::ShoulderTilt), 1);
    }

    #[test]
    fn jitter_filter_damps_single_spikes() {
        let mut config = Config::default();
        config.engine.jitter_alpha = Some(0.2);
        let mut e = StreamingEngine::new(&config);
        e.set_baseline(neutral().to_frame(0.0)).unwrap();

        e.push_frame(&neutral().to_frame(1.0));
        let out = e.push_frame(&tilted().to_frame(2.0));
        let FrameOutcome::Classified { raw, .. } = out else {
            panic!("expected classification");
        };
        // 0.2 of a 0.05 drop is 0.01 over width ~0.2: below the tilt threshold
        assert_eq!(raw.label, PostureLabel::Normal);
    }

    #[test]
    fn average_of_nothing_is_none() {
        assert!(average_frames(&[], 0.0).is_none());
    }

    #[test]
    fn depth_and_score_average_only_where_present() {
        let a = PoseFrame::new(
            0.0,
            vec![
                Keypoint::new("head", 0.4, 0.2).with_z(-0.2).with_score(0.8),
                Keypoint::new("neck", 0.5, 0.4),
            ],
        )
        .unwrap();
        let b = PoseFrame::new(
            1.0,
            vec![
                Keypoint::new("head", 0.6, 0.2).with_score(0.6),
                Keypoint::new("neck", 0.5, 0.6),
            ],
        )
        .unwrap();

        let avg = average_frames(&[a, b], 42.5).unwrap();
        assert_eq!(avg.ts(), 42.5);

        let head = avg.get("head").unwrap();
        assert_abs_diff_eq!(head.x, 0.5, epsilon = 1e-12);
        // only the first frame carries depth
        assert_abs_diff_eq!(head.z.unwrap(), -0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(head.score.unwrap(), 0.7, epsilon = 1e-12);

        let neck = avg.get("neck").unwrap();
        assert_abs_diff_eq!(neck.y, 0.5, epsilon = 1e-12);
        assert_eq!(neck.z, None);
        assert_eq!(neck.score, None);
    }
}
