// Hardware boundary: the motor, encoder and IMU drivers the drivetrain consumes
//
// Vendor drivers implement these traits; `crate::sim` provides in-process
// versions. Reads are fallible, writes are fire-and-forget.

/// Errors reading a sensor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),

    #[error("Sensor returned a non-finite value")]
    NotFinite,

    #[error("Sensor value {value} outside of [{min}, {max})")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Reject NaN/inf readings
pub fn check_finite(value: f64) -> Result<f64, SensorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SensorError::NotFinite)
    }
}

/// A brushless motor controller with an integrated relative encoder
pub trait MotorController: Send {
    /// Open-loop output in [-1, 1]
    fn set_power(&mut self, power: f64);

    /// Closed-loop velocity target handled by the controller itself
    fn set_velocity_rpm(&mut self, rpm: f64);

    /// Motor shaft rotations since power-on
    fn position_rotations(&mut self) -> Result<f64, SensorError>;

    /// Motor shaft velocity
    fn velocity_rpm(&mut self) -> Result<f64, SensorError>;
}

/// Absolute angle sensor on the steering output shaft
pub trait AbsoluteEncoder: Send {
    /// Fraction of one turn, expected in [0, 1)
    fn turns(&mut self) -> Result<f64, SensorError>;
}

/// Orientation sensor. Yaw is counter-clockwise positive unless the
/// orientation adapter is configured as inverted.
pub trait ImuDriver: Send {
    fn yaw_degrees(&mut self) -> Result<f64, SensorError>;
    fn roll_degrees(&mut self) -> Result<f64, SensorError>;
    fn pitch_degrees(&mut self) -> Result<f64, SensorError>;
    fn is_calibrating(&mut self) -> bool;
}

/// Actuators and sensors of one corner
pub struct ModuleHardware {
    pub drive: Box<dyn MotorController>,
    pub turn: Box<dyn MotorController>,
    pub encoder: Box<dyn AbsoluteEncoder>,
}

/// All drivetrain hardware, modules in FL, FR, BL, BR order
pub struct DriveHardware {
    pub modules: [ModuleHardware; 4],
    pub imu: Box<dyn ImuDriver>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_finite() {
        assert_eq!(check_finite(0.25), Ok(0.25));
        assert_eq!(check_finite(f64::NAN), Err(SensorError::NotFinite));
        assert_eq!(check_finite(f64::NEG_INFINITY), Err(SensorError::NotFinite));
    }

    #[test]
    fn test_error_messages() {
        let err = SensorError::OutOfRange {
            value: 1.2,
            min: 0.0,
            max: 1.0,
        };
        assert_eq!(err.to_string(), "Sensor value 1.2 outside of [0, 1)");
        assert_eq!(
            SensorError::ReadFailed("CAN timeout".into()).to_string(),
            "Sensor read failed: CAN timeout"
        );
    }
}
