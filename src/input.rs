// Operator input: axis shaping and the per-tick drive intent

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;

/// Response curve applied to every operator axis before scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Axis passes through unchanged
    #[default]
    Linear,
    /// Cubic, fine control near the centre of the stick
    Smooth,
    /// Cubic at half range
    Slow,
}

fn linear(x: f64) -> f64 {
    x
}

fn smooth(x: f64) -> f64 {
    x * x * x
}

fn slow(x: f64) -> f64 {
    smooth(x) / 2.0
}

impl DriveMode {
    pub fn curve(self) -> fn(f64) -> f64 {
        match self {
            DriveMode::Linear => linear,
            DriveMode::Smooth => smooth,
            DriveMode::Slow => slow,
        }
    }

    /// Shape an axis value, clamping it to [-1, 1] first
    pub fn apply(self, axis: f64) -> f64 {
        let axis = if axis.is_finite() { axis.clamp(-1.0, 1.0) } else { 0.0 };
        (self.curve())(axis)
    }

    pub fn name(self) -> &'static str {
        match self {
            DriveMode::Linear => "linear",
            DriveMode::Smooth => "smooth",
            DriveMode::Slow => "slow",
        }
    }
}

/// Operator axes in [-1, 1]. Deadbanding happens before this trait.
pub trait DriveInput {
    /// Forward
    fn robot_x(&self) -> f64;
    /// Left
    fn robot_y(&self) -> f64;
    /// Counter-clockwise
    fn robot_twist(&self) -> f64;
}

/// Fixed axis values, useful for scripts and tests
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub twist: f64,
}

impl Axes {
    pub fn new(x: f64, y: f64, twist: f64) -> Self {
        Self { x, y, twist }
    }
}

impl DriveInput for Axes {
    fn robot_x(&self) -> f64 {
        self.x
    }

    fn robot_y(&self) -> f64 {
        self.y
    }

    fn robot_twist(&self) -> f64 {
        self.twist
    }
}

/// Everything the drivetrain should do this tick, produced once by the input
/// side and consumed once by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveIntent {
    /// Forward axis in [-1, 1]
    #[serde(default)]
    pub x: f64,
    /// Left axis in [-1, 1]
    #[serde(default)]
    pub y: f64,
    /// Counter-clockwise axis in [-1, 1]
    #[serde(default)]
    pub twist: f64,
    #[serde(default)]
    pub field_relative: bool,
    /// Hold the X stance instead of driving
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub zero_gyro: bool,
    /// Re-anchor odometry at this pose before driving
    #[serde(default)]
    pub reset_pose: Option<Pose>,
}

impl DriveIntent {
    pub fn drive(x: f64, y: f64, twist: f64, field_relative: bool) -> Self {
        Self {
            x,
            y,
            twist,
            field_relative,
            ..Self::default()
        }
    }

    pub fn axes(&self) -> Axes {
        Axes::new(self.x, self.y, self.twist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drive_mode_curves() {
        assert_relative_eq!(DriveMode::Linear.apply(0.5), 0.5);
        assert_relative_eq!(DriveMode::Smooth.apply(0.5), 0.125);
        assert_relative_eq!(DriveMode::Slow.apply(0.5), 0.0625);
        assert_relative_eq!(DriveMode::Smooth.apply(-1.0), -1.0);
        assert_relative_eq!(DriveMode::Slow.apply(1.0), 0.5);
    }

    #[test]
    fn test_drive_mode_clamps_axis() {
        assert_relative_eq!(DriveMode::Linear.apply(3.0), 1.0);
        assert_relative_eq!(DriveMode::Smooth.apply(-2.0), -1.0);
        assert_eq!(DriveMode::Linear.apply(f64::NAN), 0.0);
    }

    #[test]
    fn test_intent_from_json_defaults() {
        let intent: DriveIntent = serde_json::from_str(r#"{"x": 0.5, "field_relative": true}"#).unwrap();
        assert_relative_eq!(intent.x, 0.5);
        assert_eq!(intent.y, 0.0);
        assert!(intent.field_relative);
        assert!(!intent.lock);
        assert!(intent.reset_pose.is_none());

        let intent: DriveIntent =
            serde_json::from_str(r#"{"reset_pose": {"x": 1.0, "y": 2.0, "heading": 0.5}}"#).unwrap();
        assert_eq!(intent.reset_pose, Some(Pose::new(1.0, 2.0, 0.5)));
    }

    #[test]
    fn test_drive_mode_names() {
        let mode: DriveMode = serde_json::from_str("\"slow\"").unwrap();
        assert_eq!(mode, DriveMode::Slow);
        assert_eq!(mode.name(), "slow");
    }
}
