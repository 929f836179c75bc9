// Swerve inverse/forward kinematics for a four-module chassis
// Converts body-frame velocities (vx, vy, omega) to per-module speed and angle, and back.

use nalgebra::{SMatrix, SVector, Vector2};

use crate::config::ConfigError;
use crate::geometry::ChassisSpeeds;
use crate::units::Distance;

use super::Corner;
use super::module::{ModulePosition, ModuleState};

/// Below this module speed the wheel angle is meaningless and reported as 0
const STOPPED_EPSILON: f64 = 1e-9;

/// Module placement relative to the chassis centre, plus the precomputed
/// least-squares inverse used for forward kinematics.
#[derive(Debug, Clone, PartialEq)]
pub struct SwerveKinematics {
    /// Units: meters, Frame: robot, order FL, FR, BL, BR
    offsets: [Vector2<f64>; 4],
    /// (AᵀA)⁻¹Aᵀ of the 8x3 inverse-kinematics matrix
    forward: SMatrix<f64, 3, 8>,
}

impl SwerveKinematics {
    /// Build from explicit module offsets. Fails if the offsets cannot
    /// determine a chassis motion (e.g. all modules at one point).
    pub fn new(offsets: [Vector2<f64>; 4]) -> Result<Self, ConfigError> {
        if offsets.iter().any(|o| !(o.x.is_finite() && o.y.is_finite())) {
            return Err(ConfigError::Invalid {
                field: "chassis".into(),
                reason: "module offsets must be finite".into(),
            });
        }

        // Each module contributes two rows: [1, 0, -y] and [0, 1, x]
        let inverse = SMatrix::<f64, 8, 3>::from_fn(|row, col| {
            let o = offsets[row / 2];
            match (row % 2, col) {
                (0, 0) | (1, 1) => 1.0,
                (0, 2) => -o.y,
                (1, 2) => o.x,
                _ => 0.0,
            }
        });
        let transpose = inverse.transpose();
        let normal = (transpose * inverse)
            .try_inverse()
            .ok_or_else(|| ConfigError::Invalid {
                field: "chassis".into(),
                reason: "degenerate module geometry, forward kinematics has no solution".into(),
            })?;

        Ok(Self {
            offsets,
            forward: normal * transpose,
        })
    }

    /// Rectangular layout from wheelbase (x) and track width (y)
    pub fn rectangular(wheelbase: Distance, track_width: Distance) -> Result<Self, ConfigError> {
        let half_x = wheelbase.meters() / 2.0;
        let half_y = track_width.meters() / 2.0;
        let offsets = Corner::ALL.map(|corner| {
            let (sx, sy) = corner.offset_signs();
            Vector2::new(sx * half_x, sy * half_y)
        });
        Self::new(offsets)
    }

    /// Inverse kinematics: chassis speeds -> module states (not desaturated)
    pub fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; 4] {
        self.offsets.map(|o| {
            let v = Vector2::new(speeds.vx - speeds.omega * o.y, speeds.vy + speeds.omega * o.x);
            let speed = v.norm();
            if speed < STOPPED_EPSILON {
                ModuleState::new(0.0, 0.0)
            } else {
                ModuleState::new(speed, v.y.atan2(v.x))
            }
        })
    }

    /// Forward kinematics: module states -> best-fit chassis speeds
    pub fn to_chassis_speeds(&self, states: &[ModuleState; 4]) -> ChassisSpeeds {
        let v = SVector::<f64, 8>::from_fn(|row, _| {
            let s = &states[row / 2];
            if row % 2 == 0 {
                s.speed * s.angle.cos()
            } else {
                s.speed * s.angle.sin()
            }
        });
        let result = self.forward * v;
        ChassisSpeeds::new(result[0], result[1], result[2])
    }

    /// Robot-frame displacement (dx, dy, dtheta) between two sets of module
    /// positions. The end angle of each module is taken as its travel direction.
    pub fn to_twist(&self, start: &[ModulePosition; 4], end: &[ModulePosition; 4]) -> ChassisSpeeds {
        let deltas: [ModuleState; 4] =
            std::array::from_fn(|i| ModuleState::new(end[i].distance - start[i].distance, end[i].angle));
        self.to_chassis_speeds(&deltas)
    }

    /// Scale every module down by the same factor so none exceeds `max_speed`.
    /// Returns the factor applied (1.0 when nothing was saturated).
    pub fn desaturate(states: &mut [ModuleState; 4], max_speed: f64) -> f64 {
        let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);
        if max_speed <= 0.0 || fastest <= max_speed {
            return 1.0;
        }
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, SQRT_2};

    fn square(side: f64) -> SwerveKinematics {
        SwerveKinematics::rectangular(Distance::from_meters(side), Distance::from_meters(side)).unwrap()
    }

    #[test]
    fn test_zero_velocity() {
        let states = square(0.6).to_module_states(ChassisSpeeds::zero());
        for s in states {
            assert_eq!(s.speed, 0.0);
            assert_eq!(s.angle, 0.0);
        }
    }

    #[test]
    fn test_forward_motion() {
        // Pure forward: every wheel points straight ahead at the requested speed
        let states = square(0.6).to_module_states(ChassisSpeeds::new(2.0, 0.0, 0.0));
        for s in states {
            assert_relative_eq!(s.speed, 2.0);
            assert_relative_eq!(s.angle, 0.0);
        }
    }

    #[test]
    fn test_strafe_left() {
        let states = square(0.6).to_module_states(ChassisSpeeds::new(0.0, 1.0, 0.0));
        for s in states {
            assert_relative_eq!(s.speed, 1.0);
            assert_relative_eq!(s.angle, FRAC_PI_2);
        }
    }

    #[test]
    fn test_rotation_only() {
        // Counter-clockwise spin: wheels tangent to the circle through the modules
        let side = 0.6;
        let states = square(side).to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));
        let radius = side / SQRT_2;
        for s in states {
            assert_relative_eq!(s.speed, radius, epsilon = 1e-12);
        }
        assert_relative_eq!(states[Corner::FrontLeft.index()].angle, 3.0 * FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(states[Corner::FrontRight.index()].angle, FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(states[Corner::BackLeft.index()].angle, -3.0 * FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(states[Corner::BackRight.index()].angle, -FRAC_PI_4, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let kin = SwerveKinematics::rectangular(Distance::from_meters(0.7), Distance::from_meters(0.5)).unwrap();
        for speeds in [
            ChassisSpeeds::new(1.0, 0.0, 0.0),
            ChassisSpeeds::new(-0.3, 1.7, 0.0),
            ChassisSpeeds::new(0.0, 0.0, -2.5),
            ChassisSpeeds::new(1.2, -0.8, 0.9),
        ] {
            let back = kin.to_chassis_speeds(&kin.to_module_states(speeds));
            assert_relative_eq!(back.vx, speeds.vx, epsilon = 1e-9);
            assert_relative_eq!(back.vy, speeds.vy, epsilon = 1e-9);
            assert_relative_eq!(back.omega, speeds.omega, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_twist_from_positions() {
        let kin = square(0.6);
        let start = [ModulePosition::new(1.0, 0.0); 4];
        let end = [ModulePosition::new(1.5, 0.0); 4];
        let twist = kin.to_twist(&start, &end);
        assert_relative_eq!(twist.vx, 0.5, epsilon = 1e-12);
        assert_relative_eq!(twist.vy, 0.0, epsilon = 1e-12);
        assert_relative_eq!(twist.omega, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_desaturate_preserves_ratios() {
        let mut states = [
            ModuleState::new(6.0, 0.1),
            ModuleState::new(-3.0, 0.2),
            ModuleState::new(1.5, 0.3),
            ModuleState::new(0.0, 0.4),
        ];
        let before = states;
        let scale = SwerveKinematics::desaturate(&mut states, 4.0);
        assert_relative_eq!(scale, 4.0 / 6.0);
        assert_relative_eq!(states[0].speed, 4.0);
        assert_relative_eq!(states[1].speed / states[2].speed, before[1].speed / before[2].speed);
        for (after, before) in states.iter().zip(before.iter()) {
            assert!(after.speed.abs() <= 4.0 + 1e-12);
            assert_eq!(after.angle, before.angle);
        }
    }

    #[test]
    fn test_desaturate_leaves_feasible_states() {
        let mut states = [ModuleState::new(4.4, 0.0); 4];
        assert_eq!(SwerveKinematics::desaturate(&mut states, 4.4), 1.0);
        assert_eq!(states[0].speed, 4.4);
    }

    #[test]
    fn test_degenerate_geometry_rejected() {
        let err = SwerveKinematics::new([Vector2::zeros(); 4]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(SwerveKinematics::rectangular(Distance::from_meters(0.0), Distance::from_meters(0.0)).is_err());
    }
}
