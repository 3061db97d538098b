//! Request/response handler for hosting the classifier behind a transport.
//!
//! Clients send 7-point `[x, y, z]` frames: one `set_initial` to fix the
//! reference pose, then `predict` batches of a few recent frames. The answer
//! is the majority label over the batch.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::MajorityWindow;
use crate::error::{PostureError, Result};
use crate::pose::{Kp7Frame, Kp7Name, Skeleton};
use crate::posture::{PostureLabel, PostureModel, RuleClassifier};
use crate::validator::FrameValidator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInitialRequest {
    pub keypoints: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub frames: Vec<Vec<[f64; 3]>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: PostureLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    SetInitial(SetInitialRequest),
    Predict(PredictRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServiceResponse {
    Prediction(PredictResponse),
    Ack { ok: bool },
    Error { error: String },
}

pub struct PredictionService<M = RuleClassifier> {
    model: M,
    validator: FrameValidator,
    baseline: Option<Skeleton>,
}

impl<M: PostureModel> PredictionService<M> {
    pub fn new(model: M, validator: FrameValidator) -> Self {
        Self {
            model,
            validator,
            baseline: None,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn set_initial(&mut self, req: &SetInitialRequest) -> Result<()> {
        let skeleton = self.resolve(&req.keypoints)?;
        self.baseline = Some(skeleton);
        info!("service baseline set");
        Ok(())
    }

    pub fn predict(&self, req: &PredictRequest) -> Result<PredictResponse> {
        let baseline = self.baseline.as_ref().ok_or(PostureError::NoBaseline)?;
        if req.frames.is_empty() {
            return Err(PostureError::invalid_request("frames must not be empty"));
        }

        let mut window = MajorityWindow::new(req.frames.len());
        for xyz in &req.frames {
            let current = self.resolve(xyz)?;
            window.push(self.model.predict(baseline, &current).label);
        }
        Ok(PredictResponse {
            label: window.majority(),
        })
    }

    /// Dispatches one request; failures become an `error` response.
    pub fn handle(&mut self, req: ServiceRequest) -> ServiceResponse {
        let result = match req {
            ServiceRequest::SetInitial(r) => self
                .set_initial(&r)
                .map(|()| ServiceResponse::Ack { ok: true }),
            ServiceRequest::Predict(r) => self.predict(&r).map(ServiceResponse::Prediction),
        };
        result.unwrap_or_else(|err| {
            warn!(%err, "service request failed");
            ServiceResponse::Error {
                error: err.to_string(),
            }
        })
    }

    fn resolve(&self, xyz: &[[f64; 3]]) -> Result<Skeleton> {
        let expected = Kp7Name::ALL.len();
        if xyz.len() != expected {
            return Err(PostureError::invalid_request(format!(
                "expected {expected} keypoints, got {}",
                xyz.len()
            )));
        }
        let frame = Kp7Frame::from_xyz(0.0, xyz);
        let report = self.validator.validate_kp7(&frame);
        if !report.is_ok() {
            return Err(PostureError::InvalidFrame(report));
        }
        frame.to_skeleton()
    }
}
