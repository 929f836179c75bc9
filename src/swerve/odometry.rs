// Dead-reckoning pose estimate from module travel and gyro heading
//
// The gyro is authoritative for heading: every heading change comes from it,
// wheel deltas only provide translation. A short history of samples lets a
// late vision measurement correct the pose at the time it was taken and
// replay everything after it.

use std::collections::VecDeque;

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OdometryConfig;
use crate::geometry::Pose;

use super::kinematics::SwerveKinematics;
use super::module::ModulePosition;

/// Slack when comparing timestamps against the update period
const TIME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OdometryError {
    #[error("Vision measurement at t={timestamp:.3}s rejected: {reason}")]
    VisionRejected { timestamp: f64, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdometryState {
    /// The next update only captures a baseline
    Uninitialized,
    Tracking,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp: f64,
    pose: Pose,
    gyro: f64,
    positions: [ModulePosition; 4],
}

pub struct SwerveOdometry {
    kinematics: SwerveKinematics,
    state: OdometryState,
    pose: Pose,
    prev_gyro: f64,
    prev_positions: [ModulePosition; 4],
    last_update: Option<f64>,

    period: f64,
    history_window: f64,
    vision_weight: f64,
    history: VecDeque<Sample>,
}

impl SwerveOdometry {
    pub fn new(kinematics: SwerveKinematics, config: &OdometryConfig, initial: Pose) -> Self {
        Self {
            kinematics,
            state: OdometryState::Uninitialized,
            pose: initial,
            prev_gyro: 0.0,
            prev_positions: [ModulePosition::default(); 4],
            last_update: None,
            period: config.period_s,
            history_window: config.history_window_s,
            vision_weight: config.vision_weight,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> OdometryState {
        self.state
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// True when at least one period has passed since the last update
    pub fn should_update(&self, now: f64) -> bool {
        self.last_update
            .is_none_or(|last| now - last >= self.period - TIME_EPSILON)
    }

    /// Drop the baseline: the next update re-anchors on the current pose
    /// instead of integrating across whatever happened in between
    pub fn invalidate(&mut self) {
        if self.state == OdometryState::Tracking {
            debug!("Odometry baseline invalidated");
        }
        self.state = OdometryState::Uninitialized;
        self.history.clear();
    }

    fn capture_baseline(&mut self, timestamp: f64, gyro: f64, positions: [ModulePosition; 4]) {
        self.prev_gyro = gyro;
        self.prev_positions = positions;
        self.state = OdometryState::Tracking;
        self.history.clear();
        self.push_sample(Sample {
            timestamp,
            pose: self.pose,
            gyro,
            positions,
        });
    }

    /// Integrate one sample. Returns the new pose.
    pub fn update(&mut self, timestamp: f64, gyro_heading: f64, positions: [ModulePosition; 4]) -> Pose {
        self.last_update = Some(timestamp);

        if self.state == OdometryState::Uninitialized {
            self.capture_baseline(timestamp, gyro_heading, positions);
            return self.pose;
        }

        self.pose = integrate(
            &self.kinematics,
            self.pose,
            &self.prev_positions,
            &positions,
            gyro_heading - self.prev_gyro,
        );
        self.prev_gyro = gyro_heading;
        self.prev_positions = positions;
        self.push_sample(Sample {
            timestamp,
            pose: self.pose,
            gyro: gyro_heading,
            positions,
        });
        self.pose
    }

    fn push_sample(&mut self, sample: Sample) {
        self.history.push_back(sample);
        let horizon = sample.timestamp - self.history_window;
        while self.history.len() > 1 && self.history.front().is_some_and(|s| s.timestamp < horizon) {
            self.history.pop_front();
        }
    }

    /// Re-anchor at `pose`. The current gyro reading and module positions
    /// become the new baseline. Earlier history is discarded; the reset pose
    /// is recorded at the time of the last update so vision can correct it
    /// before the next one.
    pub fn reset(&mut self, pose: Pose, gyro_heading: f64, positions: [ModulePosition; 4]) {
        self.pose = pose;
        self.prev_gyro = gyro_heading;
        self.prev_positions = positions;
        self.state = OdometryState::Tracking;
        self.history.clear();
        if let Some(timestamp) = self.last_update {
            self.push_sample(Sample {
                timestamp,
                pose,
                gyro: gyro_heading,
                positions,
            });
        }
        info!(
            "Odometry reset to ({:.3}, {:.3}, {:.1} deg)",
            pose.x,
            pose.y,
            pose.heading_degrees()
        );
    }

    /// Fuse an absolute pose observed at `timestamp`.
    ///
    /// The stored sample at or just before `timestamp` is pulled toward the
    /// measurement by the configured weight, then every later sample is
    /// re-integrated on top of it. Measurements newer than the last sample
    /// apply to the last sample.
    pub fn add_vision_measurement(&mut self, measured: Pose, timestamp: f64) -> Result<Pose, OdometryError> {
        let reject = |reason| Err(OdometryError::VisionRejected { timestamp, reason });

        if !(measured.x.is_finite() && measured.y.is_finite() && measured.heading.is_finite()) {
            return reject("pose is not finite");
        }
        if !timestamp.is_finite() {
            return reject("timestamp is not finite");
        }
        let (first, last) = match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return reject("no odometry history"),
        };
        if timestamp < last - self.history_window {
            return reject("older than the history window");
        }
        if timestamp < first {
            return reject("predates the odometry history");
        }

        let index = self.history.partition_point(|s| s.timestamp <= timestamp) - 1;
        let anchor = &mut self.history[index];
        anchor.pose = anchor.pose.blend(&measured, self.vision_weight);

        for i in index + 1..self.history.len() {
            let prev = self.history[i - 1];
            let sample = &mut self.history[i];
            sample.pose = integrate(
                &self.kinematics,
                prev.pose,
                &prev.positions,
                &sample.positions,
                sample.gyro - prev.gyro,
            );
        }

        if let Some(latest) = self.history.back() {
            self.pose = latest.pose;
        }
        debug!(
            "Vision measurement fused at t={:.3}s, replayed {} samples",
            timestamp,
            self.history.len() - index - 1
        );
        Ok(self.pose)
    }
}

/// Advance `pose` by the wheel travel between two position sets and the
/// gyro's heading change. The robot frame translation is rotated into the
/// field by the mean heading over the step.
fn integrate(
    kinematics: &SwerveKinematics,
    pose: Pose,
    start: &[ModulePosition; 4],
    end: &[ModulePosition; 4],
    dheading: f64,
) -> Pose {
    let twist = kinematics.to_twist(start, end);
    let mid = pose.heading + dheading / 2.0;
    let delta = Rotation2::new(mid) * Vector2::new(twist.vx, twist.vy);
    pose.offset_by(delta, dheading)
}
