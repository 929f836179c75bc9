// Planar geometry shared by kinematics, odometry and the coordinator
//
// Conventions: +x forward, +y left, angles in radians, counter-clockwise
// positive. Headings are continuous (never wrapped) unless a function says
// otherwise.

use std::f64::consts::{PI, TAU};

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// Wrap an angle into (-pi, pi].
///
/// Angles already inside the range are returned untouched so that exact
/// values such as pi/2 survive without rounding.
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Signed shortest rotation that takes `from` onto `to`, in (-pi, pi]
pub fn shortest_angular_distance(from: f64, to: f64) -> f64 {
    wrap_angle(to - from)
}

/// Robot pose on the field
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Units: meters, Frame: field
    pub x: f64,
    /// Units: meters, Frame: field
    pub y: f64,
    /// Continuous heading. Units: radians
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading.to_degrees()
    }

    /// Move by a field-frame translation and heading change
    pub fn offset_by(&self, delta: Vector2<f64>, dheading: f64) -> Pose {
        Pose {
            x: self.x + delta.x,
            y: self.y + delta.y,
            heading: self.heading + dheading,
        }
    }

    /// Linear interpolation toward `target`; heading takes the short way round
    pub fn blend(&self, target: &Pose, weight: f64) -> Pose {
        let w = weight.clamp(0.0, 1.0);
        Pose {
            x: self.x + (target.x - self.x) * w,
            y: self.y + (target.y - self.y) * w,
            heading: self.heading + shortest_angular_distance(self.heading, target.heading) * w,
        }
    }
}

/// Velocity of the chassis. Whether this is robot- or field-relative depends
/// on where it came from; cross frames only through the transforms below.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    /// Units: meters/second
    pub vx: f64,
    /// Units: meters/second
    pub vy: f64,
    /// Units: radians/second
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.vx, self.vy)
    }

    /// Field-relative speeds -> robot-relative speeds, given the robot heading
    pub fn from_field_relative(field: ChassisSpeeds, heading: f64) -> ChassisSpeeds {
        let v = Rotation2::new(-heading) * field.translation();
        ChassisSpeeds::new(v.x, v.y, field.omega)
    }

    /// Robot-relative speeds -> field-relative speeds, given the robot heading
    pub fn to_field_relative(robot: ChassisSpeeds, heading: f64) -> ChassisSpeeds {
        let v = Rotation2::new(heading) * robot.translation();
        ChassisSpeeds::new(v.x, v.y, robot.omega)
    }
}
