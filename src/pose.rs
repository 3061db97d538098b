//! Keypoint model.
//!
//! Two landmark sets are in play:
//! - the reduced 6-point set the classifier works on (`head`, `neck`,
//!   shoulders, hips), carried in a [`PoseFrame`] and resolved into a
//!   [`Skeleton`];
//! - the 7-point upper-body set used for baseline capture
//!   (shoulders, ears, eyes, nose), carried in a [`Kp7Frame`].
//!
//! Both can be built from raw 33-point BlazePose output ([`Landmark`]).

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PostureError, Result};

/// BlazePose landmark indices.
pub mod blazepose {
    pub const NOSE: usize = 0;
    pub const LEFT_EYE: usize = 2;
    pub const RIGHT_EYE: usize = 5;
    pub const LEFT_EAR: usize = 7;
    pub const RIGHT_EAR: usize = 8;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(self, other: Self) -> Self {
        Self {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One landmark as produced by the pose model (normalized image coordinates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

/// The six joints the rule classifier reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Head,
    Neck,
    ShoulderL,
    ShoulderR,
    HipL,
    HipR,
}

impl Joint {
    pub const ALL: [Joint; 6] = [
        Joint::Head,
        Joint::Neck,
        Joint::ShoulderL,
        Joint::ShoulderR,
        Joint::HipL,
        Joint::HipR,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Neck => "neck",
            Self::ShoulderL => "shoulder_l",
            Self::ShoulderR => "shoulder_r",
            Self::HipL => "hip_l",
            Self::HipR => "hip_r",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named landmark with optional depth and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "confidence")]
    pub score: Option<f64>,
}

impl Keypoint {
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            z: None,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Deserialize)]
struct RawPoseFrame {
    #[serde(alias = "timestamp")]
    ts: f64,
    keypoints: Vec<Keypoint>,
}

impl TryFrom<RawPoseFrame> for PoseFrame {
    type Error = PostureError;

    fn try_from(raw: RawPoseFrame) -> Result<Self> {
        PoseFrame::new(raw.ts, raw.keypoints)
    }
}

/// Keypoints captured at one instant. Names are unique within a frame.
/// `ts` is in milliseconds from either a monotonic or a wall clock, so it may
/// be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoseFrame")]
pub struct PoseFrame {
    ts: f64,
    keypoints: Vec<Keypoint>,
}

impl PoseFrame {
    pub fn new(ts: f64, keypoints: Vec<Keypoint>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(keypoints.len());
        for kp in &keypoints {
            if !seen.insert(kp.name.as_str()) {
                return Err(PostureError::DuplicateKeypoint {
                    name: kp.name.clone(),
                });
            }
        }
        Ok(Self { ts, keypoints })
    }

    /// Builds the 6-point classifier frame from a full BlazePose result.
    /// `neck` is the shoulder midpoint. Returns `None` when the hips are
    /// not part of the result.
    pub fn from_landmarks(ts: f64, landmarks: &[Landmark]) -> Option<Self> {
        let at = |i: usize| landmarks.get(i).map(|l| Point::new(f64::from(l.x), f64::from(l.y)));
        let head = at(blazepose::NOSE)?;
        let sl = at(blazepose::LEFT_SHOULDER)?;
        let sr = at(blazepose::RIGHT_SHOULDER)?;
        let hl = at(blazepose::LEFT_HIP)?;
        let hr = at(blazepose::RIGHT_HIP)?;

        Some(
            Skeleton {
                head,
                neck: sl.midpoint(sr),
                shoulder_l: sl,
                shoulder_r: sr,
                hip_l: hl,
                hip_r: hr,
            }
            .to_frame(ts as f64),
        )
    }

    pub fn ts(&self) -> f64 {
        self.ts
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }

    pub fn joint(&self, joint: Joint) -> Option<Point> {
        self.get(joint.as_str()).map(Keypoint::point)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Resolved 6-point view of a frame, the classifier's working form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Skeleton {
    pub head: Point,
    pub neck: Point,
    pub shoulder_l: Point,
    pub shoulder_r: Point,
    pub hip_l: Point,
    pub hip_r: Point,
}

impl Skeleton {
    /// Fails with [`PostureError::MissingKeypoint`] naming the first absent joint.
    pub fn from_frame(frame: &PoseFrame) -> Result<Self> {
        let get = |j: Joint| frame.joint(j).ok_or_else(|| PostureError::missing(j.as_str()));
        Ok(Self {
            head: get(Joint::Head)?,
            neck: get(Joint::Neck)?,
            shoulder_l: get(Joint::ShoulderL)?,
            shoulder_r: get(Joint::ShoulderR)?,
            hip_l: get(Joint::HipL)?,
            hip_r: get(Joint::HipR)?,
        })
    }

    pub fn point(&self, joint: Joint) -> Point {
        match joint {
            Joint::Head => self.head,
            Joint::Neck => self.neck,
            Joint::ShoulderL => self.shoulder_l,
            Joint::ShoulderR => self.shoulder_r,
            Joint::HipL => self.hip_l,
            Joint::HipR => self.hip_r,
        }
    }

    pub fn point_mut(&mut self, joint: Joint) -> &mut Point {
        match joint {
            Joint::Head => &mut self.head,
            Joint::Neck => &mut self.neck,
            Joint::ShoulderL => &mut self.shoulder_l,
            Joint::ShoulderR => &mut self.shoulder_r,
            Joint::HipL => &mut self.hip_l,
            Joint::HipR => &mut self.hip_r,
        }
    }

    pub fn hip_mid(&self) -> Point {
        self.hip_l.midpoint(self.hip_r)
    }

    pub fn to_frame(&self, ts: f64) -> PoseFrame {
        let keypoints = Joint::ALL
            .iter()
            .map(|&j| {
                let p = self.point(j);
                Keypoint::new(j.as_str(), p.x, p.y)
            })
            .collect();
        // Joint names are distinct, so the uniqueness check cannot fail.
        PoseFrame { ts, keypoints }
    }
}

/// Names of the 7-point capture set, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kp7Name {
    LeftShoulder,
    RightShoulder,
    LeftEar,
    RightEar,
    LeftEye,
    RightEye,
    Nose,
}

impl Kp7Name {
    pub const ALL: [Kp7Name; 7] = [
        Kp7Name::LeftShoulder,
        Kp7Name::RightShoulder,
        Kp7Name::LeftEar,
        Kp7Name::RightEar,
        Kp7Name::LeftEye,
        Kp7Name::RightEye,
        Kp7Name::Nose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::Nose => "nose",
        }
    }

    fn blazepose_index(&self) -> usize {
        match self {
            Self::LeftShoulder => blazepose::LEFT_SHOULDER,
            Self::RightShoulder => blazepose::RIGHT_SHOULDER,
            Self::LeftEar => blazepose::LEFT_EAR,
            Self::RightEar => blazepose::RIGHT_EAR,
            Self::LeftEye => blazepose::LEFT_EYE,
            Self::RightEye => blazepose::RIGHT_EYE,
            Self::Nose => blazepose::NOSE,
        }
    }
}

impl fmt::Display for Kp7Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kp7Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "full_visibility", alias = "visibility")]
    pub v: f64,
}

fn full_visibility() -> f64 {
    1.0
}

impl Kp7Point {
    pub const fn new(x: f64, y: f64, z: f64, v: f64) -> Self {
        Self { x, y, z, v }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Vertical offset of the synthetic hips placed under 7-point shoulders.
const KP7_HIP_DROP: f64 = 1.0;

/// Upper-body capture frame. `points` is positional, see [`Kp7Name::ALL`];
/// its length is not enforced here so the validator can report arity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kp7Frame {
    #[serde(alias = "timestamp")]
    pub ts: f64,
    pub points: Vec<Kp7Point>,
}

impl Kp7Frame {
    pub fn new(ts: f64, points: Vec<Kp7Point>) -> Self {
        Self { ts, points }
    }

    /// Picks the seven capture landmarks out of a BlazePose result.
    /// Visibility defaults to 1 and depth to 0 when not finite; a frame whose
    /// selected x/y are not finite is dropped so the next one can be tried.
    pub fn from_landmarks(ts: f64, landmarks: &[Landmark]) -> Option<Self> {
        if landmarks.len() <= blazepose::RIGHT_SHOULDER {
            return None;
        }
        let finite_or = |v: f32, default: f64| {
            let v = f64::from(v);
            if v.is_finite() {
                v
            } else {
                default
            }
        };

        let mut points = Vec::with_capacity(Kp7Name::ALL.len());
        for name in Kp7Name::ALL {
            let lm = &landmarks[name.blazepose_index()];
            let (x, y) = (f64::from(lm.x), f64::from(lm.y));
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            points.push(Kp7Point::new(x, y, finite_or(lm.z, 0.0), finite_or(lm.visibility, 1.0)));
        }
        Some(Self { ts, points })
    }

    /// Builds a frame from `[x, y, z]` triples, as sent over the wire.
    pub fn from_xyz(ts: f64, xyz: &[[f64; 3]]) -> Self {
        let points = xyz
            .iter()
            .map(|&[x, y, z]| Kp7Point::new(x, y, z, 1.0))
            .collect();
        Self { ts, points }
    }

    /// `[x, y, z]` triples with non-finite depth replaced by 0.
    pub fn xyz(&self) -> Vec<[f64; 3]> {
        self.points
            .iter()
            .map(|p| [p.x, p.y, if p.z.is_finite() { p.z } else { 0.0 }])
            .collect()
    }

    pub fn get(&self, name: Kp7Name) -> Option<&Kp7Point> {
        let idx = Kp7Name::ALL.iter().position(|n| *n == name)?;
        self.points.get(idx)
    }

    /// Projects the capture set onto the classifier joints: head is the
    /// nose, neck the shoulder midpoint. There are no hip landmarks, so hips
    /// sit a fixed distance below each shoulder and torso compression reads
    /// as zero.
    pub fn to_skeleton(&self) -> Result<Skeleton> {
        let get = |n: Kp7Name| {
            self.get(n)
                .map(Kp7Point::point)
                .ok_or_else(|| PostureError::missing(n.as_str()))
        };
        let sl = get(Kp7Name::LeftShoulder)?;
        let sr = get(Kp7Name::RightShoulder)?;
        let nose = get(Kp7Name::Nose)?;
        let below = |p: Point| Point::new(p.x, p.y + KP7_HIP_DROP);

        Ok(Skeleton {
            head: nose,
            neck: sl.midpoint(sr),
            shoulder_l: sl,
            shoulder_r: sr,
            hip_l: below(sl),
            hip_r: below(sr),
        })
    }
}
