// Message types exchanged with the runtime over zenoh (JSON)

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;

// Drive commands are `input::DriveIntent`, re-exported so publishers only
// need this module
pub use crate::input::DriveIntent;

/// Absolute pose from a camera pipeline -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionMeasurement {
    pub pose: Pose,
    /// How long ago the image was captured. Units: seconds
    #[serde(default)]
    pub latency_s: f64,
}

/// Pose snapshot published by the runtime every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseMessage {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    /// Seconds since the runtime started
    pub timestamp: f64,
}

impl PoseMessage {
    pub fn new(pose: Pose, timestamp: f64) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading_degrees(),
            timestamp,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// Motion refused while the IMU calibrates
    Calibrating,
    /// Drivetrain could not be built; see the `swerve.config` fault
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intent_accepts_partial_json() {
        let intent: DriveIntent = serde_json::from_str(r#"{"x": 0.5, "field_relative": true}"#).unwrap();
        assert_eq!(intent, DriveIntent::drive(0.5, 0.0, 0.0, true));

        let intent: DriveIntent = serde_json::from_str(r#"{"lock": true}"#).unwrap();
        assert!(intent.lock);
    }

    #[test]
    fn test_vision_latency_defaults_to_zero() {
        let msg: VisionMeasurement =
            serde_json::from_str(r#"{"pose": {"x": 1.0, "y": 2.0, "heading": 0.5}}"#).unwrap();
        assert_eq!(msg.pose, Pose::new(1.0, 2.0, 0.5));
        assert_eq!(msg.latency_s, 0.0);
    }

    #[test]
    fn test_pose_message_reports_degrees() {
        let msg = PoseMessage::new(Pose::new(1.0, -1.0, std::f64::consts::FRAC_PI_2), 3.0);
        assert_relative_eq!(msg.heading_deg, 90.0, epsilon = 1e-12);
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["timestamp"], 3.0);
    }

    #[test]
    fn test_health_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(), r#""cmd_stale""#);
        assert_eq!(serde_json::to_string(&RuntimeHealth::Calibrating).unwrap(), r#""calibrating""#);
    }
}
