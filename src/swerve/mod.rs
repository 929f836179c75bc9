// Swerve drivetrain core
//
// Provides:
// - Per-corner module control (optimization, steering PID, drive output)
// - Inverse/forward kinematics with desaturation
// - Odometry with timestamped vision replay
// - Velocity-feasibility limiter
// - The DriveCoordinator facade that ties it all together

pub mod chassis;
pub mod coordinator;
pub mod hal;
pub mod kinematics;
pub mod limiter;
pub mod module;
pub mod odometry;
pub mod orientation;
pub mod pid;

use serde::{Deserialize, Serialize};

pub use chassis::{DriveReport, SwerveChassis};
pub use coordinator::{DriveCoordinator, DriveError, Drivetrain};
pub use hal::{AbsoluteEncoder, DriveHardware, ImuDriver, ModuleHardware, MotorController, SensorError};
pub use kinematics::SwerveKinematics;
pub use limiter::AccelerationLimiter;
pub use module::{ModulePosition, ModuleState, SwerveModule};
pub use odometry::{OdometryError, SwerveOdometry};
pub use orientation::Orientation;

/// Module corners, in the order used by every per-module array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::FrontLeft,
        Corner::FrontRight,
        Corner::BackLeft,
        Corner::BackRight,
    ];

    /// Telemetry/config key
    pub fn key(self) -> &'static str {
        match self {
            Corner::FrontLeft => "front_left",
            Corner::FrontRight => "front_right",
            Corner::BackLeft => "back_left",
            Corner::BackRight => "back_right",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Corner::FrontLeft => 0,
            Corner::FrontRight => 1,
            Corner::BackLeft => 2,
            Corner::BackRight => 3,
        }
    }

    /// Sign of the module's (x, y) offset from the chassis centre
    pub fn offset_signs(self) -> (f64, f64) {
        match self {
            Corner::FrontLeft => (1.0, 1.0),
            Corner::FrontRight => (1.0, -1.0),
            Corner::BackLeft => (-1.0, 1.0),
            Corner::BackRight => (-1.0, -1.0),
        }
    }
}
