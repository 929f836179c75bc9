// PID controller used to steer each module toward its target angle

use serde::{Deserialize, Serialize};

use crate::geometry::wrap_angle;

/// Proportional/integral/derivative gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.8,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

impl PidGains {
    pub fn validate(&self) -> Result<(), String> {
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(format!("{} must be a finite, non-negative gain, got {}", name, gain));
            }
        }
        if self.kp == 0.0 {
            return Err("kp must be non-zero".to_string());
        }
        Ok(())
    }
}

/// PID controller with optional continuous (angle) input and clamped output.
pub struct PidController {
    gains: PidGains,
    /// Fixed loop period. Units: seconds
    period: f64,
    continuous: bool,
    output_limit: f64,
    /// Anti-windup bound on the integral term contribution
    integral_limit: f64,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains, period: f64) -> Self {
        Self {
            gains,
            period,
            continuous: false,
            output_limit: f64::INFINITY,
            integral_limit: 1.0,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Treat input as an angle in radians: error always takes the short way round
    pub fn with_continuous_input(mut self) -> Self {
        self.continuous = true;
        self
    }

    /// Clamp output to [-limit, limit]
    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_limit = limit.abs();
        self
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    fn error(&self, measurement: f64, setpoint: f64) -> f64 {
        if self.continuous {
            wrap_angle(setpoint - measurement)
        } else {
            setpoint - measurement
        }
    }

    /// Compute the next output for a measurement and setpoint
    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let error = self.error(measurement, setpoint);

        if self.gains.ki > 0.0 {
            self.integral += error * self.period;
            let bound = self.integral_limit / self.gains.ki;
            self.integral = self.integral.clamp(-bound, bound);
        }

        let derivative = match self.prev_error {
            Some(prev) if self.period > 0.0 => {
                let delta = if self.continuous {
                    wrap_angle(error - prev)
                } else {
                    error - prev
                };
                delta / self.period
            }
            _ => 0.0,
        };
        self.prev_error = Some(error);

        let output = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        output.clamp(-self.output_limit, self.output_limit)
    }

    /// True once the last error is within `tolerance`
    pub fn at_setpoint(&self, tolerance: f64) -> bool {
        self.prev_error.is_some_and(|e| e.abs() <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p_only(kp: f64) -> PidGains {
        PidGains { kp, ki: 0.0, kd: 0.0 }
    }

    #[test]
    fn test_proportional_output() {
        let mut pid = PidController::new(p_only(0.5), 0.02);
        assert_relative_eq!(pid.calculate(0.0, 1.0), 0.5);
        assert_relative_eq!(pid.calculate(1.0, 0.0), -0.5);
    }

    #[test]
    fn test_continuous_error_takes_short_way() {
        let mut pid = PidController::new(p_only(1.0), 0.02).with_continuous_input();
        // From 170 deg to -170 deg is +20 deg, not -340 deg
        let out = pid.calculate(170f64.to_radians(), (-170f64).to_radians());
        assert_relative_eq!(out, 20f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn test_output_is_clamped() {
        let mut pid = PidController::new(p_only(10.0), 0.02).with_output_limit(1.0);
        assert_relative_eq!(pid.calculate(0.0, 2.0), 1.0);
        assert_relative_eq!(pid.calculate(0.0, -2.0), -1.0);
    }

    #[test]
    fn test_derivative_term_and_reset() {
        let gains = PidGains { kp: 0.0, ki: 0.0, kd: 1.0 };
        let mut pid = PidController::new(gains, 0.5);
        assert_relative_eq!(pid.calculate(0.0, 1.0), 0.0);
        // Error shrinks from 1.0 to 0.5 over 0.5 s
        assert_relative_eq!(pid.calculate(0.5, 1.0), -1.0);
        pid.reset();
        assert_relative_eq!(pid.calculate(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_integral_accumulates() {
        let gains = PidGains { kp: 0.0, ki: 1.0, kd: 0.0 };
        let mut pid = PidController::new(gains, 0.1);
        pid.calculate(0.0, 1.0);
        assert_relative_eq!(pid.calculate(0.0, 1.0), 0.2, epsilon = 1e-12);
        assert!(pid.at_setpoint(2.0));
    }

    #[test]
    fn test_gain_validation() {
        assert!(PidGains::default().validate().is_ok());
        assert!(p_only(0.0).validate().is_err());
        assert!(PidGains { kp: 1.0, ki: -0.1, kd: 0.0 }.validate().is_err());
        assert!(PidGains { kp: f64::NAN, ki: 0.0, kd: 0.0 }.validate().is_err());
    }
}
