//! Baseline capture: wait, within a deadline, for one frame clean enough to
//! become the reference pose.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::validator::{FrameValidator, Validate};

/// Hands out the most recent frame on demand.
pub trait FrameSource {
    type Frame;

    fn latest(&self) -> Option<Self::Frame>;
}

impl<F, T> FrameSource for F
where
    F: Fn() -> Option<T>,
{
    type Frame = T;

    fn latest(&self) -> Option<T> {
        self()
    }
}

/// Single-slot mailbox a pose producer publishes into. Clones share the slot.
#[derive(Debug)]
pub struct LatestFrame<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for LatestFrame<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Default for LatestFrame<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrame<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, frame: T) {
        self.tx.send_replace(Some(frame));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl<T: Clone> FrameSource for LatestFrame<T> {
    type Frame = T;

    fn latest(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls `source` every `poll_interval` (first poll immediately) and returns
/// the first frame that passes `validator`. Returns `None` once `timeout`
/// elapses. Dropping the future abandons the wait.
pub async fn capture_stable<S>(
    source: &S,
    validator: &FrameValidator,
    config: &CaptureConfig,
) -> Option<S::Frame>
where
    S: FrameSource + ?Sized,
    S::Frame: Validate,
{
    let polls = async {
        // `interval` panics on a zero period
        let period = config.poll_interval().max(MIN_POLL_INTERVAL);
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;
        loop {
            ticker.tick().await;
            attempts += 1;
            let Some(frame) = source.latest() else {
                continue;
            };
            let report = frame.validate_with(validator);
            if report.is_ok() {
                return (frame, attempts);
            }
            debug!(attempts, %report, "capture candidate rejected");
        }
    };

    match time::timeout(config.timeout(), polls).await {
        Ok((frame, attempts)) => {
            info!(attempts, "stable frame captured");
            Some(frame)
        }
        Err(_) => {
            warn!(timeout_ms = config.timeout_ms, "no stable frame before deadline");
            None
        }
    }
}
