// Timeouts, topics, drivetrain configuration
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::input::DriveMode;
use crate::swerve::Corner;
use crate::swerve::pid::PidGains;
use crate::units::{AngularVelocity, Distance, GearRatio, LinearVelocity};

// Runtime loop frequency (one tick every 20ms)
pub const LOOP_HZ: u64 = 50;
pub const TICK_PERIOD: Duration = Duration::from_millis(1000 / LOOP_HZ);

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // drive intents
pub const TOPIC_VISION: &str = "swerve/vision/pose"; // absolute pose observations
pub const TOPIC_TELEMETRY: &str = "swerve/rt/telemetry"; // per-tick key/value frame
pub const TOPIC_POSE: &str = "swerve/state/pose"; // pose snapshots
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Drivetrain geometry file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/drivetrain.toml";

/// Errors loading or validating the drivetrain configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// What to do with motion requests while the IMU is still calibrating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPolicy {
    /// Stop the modules and report `DriveError::CalibrationInProgress`
    #[default]
    Reject,
    /// Drive anyway, treating the heading as zero for field-relative requests
    TreatHeadingAsZero,
}

/// Complete drivetrain configuration, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub chassis: ChassisConfig,
    /// Values shared by all four modules
    pub module: ModuleDefaults,
    pub corners: CornerSet,
    #[serde(default)]
    pub orientation: OrientationConfig,
    #[serde(default)]
    pub odometry: OdometryConfig,
    /// Acceleration limiter, disabled when absent
    #[serde(default)]
    pub limiter: Option<LimiterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChassisConfig {
    /// Front-to-back distance between module centres
    #[serde(rename = "wheelbase_m")]
    pub wheelbase: Distance,
    /// Left-to-right distance between module centres
    #[serde(rename = "track_width_m")]
    pub track_width: Distance,
    /// Use the motor controllers' velocity loop instead of open-loop power
    #[serde(default)]
    pub closed_loop: bool,
    #[serde(default)]
    pub drive_mode: DriveMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefaults {
    pub drive_gear_ratio: GearRatio,
    pub turn_gear_ratio: GearRatio,
    #[serde(rename = "wheel_diameter_m")]
    pub wheel_diameter: Distance,
    #[serde(rename = "max_linear_velocity_mps")]
    pub max_linear_velocity: LinearVelocity,
    #[serde(rename = "max_angular_velocity_radps")]
    pub max_angular_velocity: AngularVelocity,
    #[serde(default)]
    pub turn_pid: PidGains,
    /// Below this speed a module keeps its previous steering target
    #[serde(rename = "speed_deadband_mps", default = "default_speed_deadband")]
    pub speed_deadband: f64,
}

fn default_speed_deadband() -> f64 {
    0.01
}

/// Per-corner values
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CornerConfig {
    /// Absolute encoder reading that corresponds to the wheel facing forward
    #[serde(default)]
    pub mount_offset_deg: f64,
    #[serde(default)]
    pub drive_inverted: bool,
    #[serde(default)]
    pub turn_inverted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CornerSet {
    pub front_left: CornerConfig,
    pub front_right: CornerConfig,
    pub back_left: CornerConfig,
    pub back_right: CornerConfig,
}

impl CornerSet {
    pub fn get(&self, corner: Corner) -> &CornerConfig {
        match corner {
            Corner::FrontLeft => &self.front_left,
            Corner::FrontRight => &self.front_right,
            Corner::BackLeft => &self.back_left,
            Corner::BackRight => &self.back_right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationConfig {
    /// Negate the IMU yaw so that counter-clockwise is positive
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub calibration_policy: CalibrationPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometryConfig {
    /// Minimum time between odometry updates. Units: seconds
    #[serde(default = "default_odometry_period")]
    pub period_s: f64,
    /// How far back vision measurements may reach. Units: seconds
    #[serde(default = "default_history_window")]
    pub history_window_s: f64,
    /// 0 ignores vision, 1 snaps the historical pose onto the measurement
    #[serde(default = "default_vision_weight")]
    pub vision_weight: f64,
}

fn default_odometry_period() -> f64 {
    TICK_PERIOD.as_secs_f64()
}

fn default_history_window() -> f64 {
    1.5
}

fn default_vision_weight() -> f64 {
    1.0
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            period_s: default_odometry_period(),
            history_window_s: default_history_window(),
            vision_weight: default_vision_weight(),
        }
    }
}

/// Physical parameters of the achievable-acceleration ellipse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub mass_kg: f64,
    /// Height of the centre of gravity above the floor
    pub cg_height_m: f64,
    /// Tyre/carpet friction coefficient
    pub friction_coefficient: f64,
    /// Fraction (0, 1] of the static tipping acceleration we allow
    pub tip_margin: f64,
    /// Total traction force all drive motors can produce
    pub max_drive_force_n: f64,
}

/// Fully resolved configuration for one module
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleConfig {
    pub drive_gear_ratio: GearRatio,
    pub turn_gear_ratio: GearRatio,
    pub wheel_diameter: Distance,
    /// Units: radians
    pub mount_offset: f64,
    pub max_linear_velocity: LinearVelocity,
    pub max_angular_velocity: AngularVelocity,
    pub drive_inverted: bool,
    pub turn_inverted: bool,
    pub turn_pid: PidGains,
    /// Units: meters/second
    pub speed_deadband: f64,
}

impl DriveConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded drivetrain configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate a TOML configuration
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Uniform square chassis with zero mount offsets and no limiter
    pub fn square(side: Distance, max_speed: LinearVelocity) -> Self {
        let radius = side.meters() / std::f64::consts::SQRT_2;
        DriveConfig {
            chassis: ChassisConfig {
                wheelbase: side,
                track_width: side,
                closed_loop: false,
                drive_mode: DriveMode::Linear,
            },
            module: ModuleDefaults {
                drive_gear_ratio: GearRatio::reduction_unchecked(6.75),
                turn_gear_ratio: GearRatio::reduction_unchecked(12.8),
                wheel_diameter: Distance::from_inches(4.0),
                max_linear_velocity: max_speed,
                max_angular_velocity: AngularVelocity::from_rad_per_sec(max_speed.mps() / radius),
                turn_pid: PidGains::default(),
                speed_deadband: default_speed_deadband(),
            },
            corners: CornerSet::default(),
            orientation: OrientationConfig::default(),
            odometry: OdometryConfig::default(),
            limiter: None,
        }
    }

    /// Resolve the configuration of one corner module
    pub fn module_config(&self, corner: Corner) -> ModuleConfig {
        let c = self.corners.get(corner);
        ModuleConfig {
            drive_gear_ratio: self.module.drive_gear_ratio,
            turn_gear_ratio: self.module.turn_gear_ratio,
            wheel_diameter: self.module.wheel_diameter,
            mount_offset: c.mount_offset_deg.to_radians(),
            max_linear_velocity: self.module.max_linear_velocity,
            max_angular_velocity: self.module.max_angular_velocity,
            drive_inverted: c.drive_inverted,
            turn_inverted: c.turn_inverted,
            turn_pid: self.module.turn_pid,
            speed_deadband: self.module.speed_deadband,
        }
    }

    /// Check every value the control code divides by or relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("chassis.wheelbase_m", self.chassis.wheelbase.meters())?;
        positive("chassis.track_width_m", self.chassis.track_width.meters())?;
        positive("module.wheel_diameter_m", self.module.wheel_diameter.meters())?;
        positive(
            "module.max_linear_velocity_mps",
            self.module.max_linear_velocity.mps(),
        )?;
        positive(
            "module.max_angular_velocity_radps",
            self.module.max_angular_velocity.rad_per_sec(),
        )?;
        non_negative("module.speed_deadband_mps", self.module.speed_deadband)?;
        if self.module.speed_deadband >= self.module.max_linear_velocity.mps() {
            return Err(ConfigError::invalid(
                "module.speed_deadband_mps",
                "must be below the maximum linear velocity",
            ));
        }
        self.module
            .turn_pid
            .validate()
            .map_err(|reason| ConfigError::invalid("module.turn_pid", reason))?;

        for corner in Corner::ALL {
            let offset = self.corners.get(corner).mount_offset_deg;
            if !offset.is_finite() {
                return Err(ConfigError::invalid(
                    format!("corners.{}.mount_offset_deg", corner.key()),
                    "must be finite",
                ));
            }
        }

        positive("odometry.period_s", self.odometry.period_s)?;
        positive("odometry.history_window_s", self.odometry.history_window_s)?;
        if !(0.0..=1.0).contains(&self.odometry.vision_weight) {
            return Err(ConfigError::invalid(
                "odometry.vision_weight",
                "must be within [0, 1]",
            ));
        }

        if let Some(limiter) = &self.limiter {
            positive("limiter.mass_kg", limiter.mass_kg)?;
            positive("limiter.cg_height_m", limiter.cg_height_m)?;
            positive("limiter.friction_coefficient", limiter.friction_coefficient)?;
            positive("limiter.max_drive_force_n", limiter.max_drive_force_n)?;
            if !(limiter.tip_margin > 0.0 && limiter.tip_margin <= 1.0) {
                return Err(ConfigError::invalid(
                    "limiter.tip_margin",
                    "must be within (0, 1]",
                ));
            }
        }

        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("expected a positive number, got {}", value)))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("expected a non-negative number, got {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE: &str = r#"
        [chassis]
        wheelbase_m = 0.6604
        track_width_m = 0.6604
        closed_loop = true
        drive_mode = "smooth"

        [module]
        drive_gear_ratio = "6.86:1"
        turn_gear_ratio = 12.8
        wheel_diameter_m = 0.1016
        max_linear_velocity_mps = 4.4
        max_angular_velocity_radps = 9.0

        [module.turn_pid]
        kp = 0.8
        ki = 0.0
        kd = 0.01

        [corners.front_left]
        mount_offset_deg = 181.45
        [corners.front_right]
        mount_offset_deg = -226.32
        drive_inverted = true
        [corners.back_left]
        mount_offset_deg = 12.71
        [corners.back_right]
        mount_offset_deg = 169.38

        [limiter]
        mass_kg = 54.0
        cg_height_m = 0.3
        friction_coefficient = 1.1
        tip_margin = 0.8
        max_drive_force_n = 600.0
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = DriveConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.chassis.closed_loop);
        assert_eq!(config.chassis.drive_mode, DriveMode::Smooth);
        assert_relative_eq!(config.module.drive_gear_ratio.reduction(), 6.86);
        assert_relative_eq!(config.module.speed_deadband, 0.01);
        assert_eq!(config.orientation.calibration_policy, CalibrationPolicy::Reject);
        assert_relative_eq!(config.odometry.period_s, 0.02);
        assert!(config.limiter.is_some());

        let fr = config.module_config(Corner::FrontRight);
        assert!(fr.drive_inverted);
        assert!(!fr.turn_inverted);
        assert_relative_eq!(fr.mount_offset, (-226.32f64).to_radians());
    }

    #[test]
    fn test_bundled_config_file_is_valid() {
        let text = include_str!("../config/drivetrain.toml");
        assert!(DriveConfig::from_toml_str(text).is_ok());
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let err = DriveConfig::from_toml_str("[chassis]\nwheelbase_m = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = SAMPLE.replace("wheel_diameter_m = 0.1016", "wheel_diameter_m = 0.0");
        let err = DriveConfig::from_toml_str(&bad).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Invalid { field, .. } if field == "module.wheel_diameter_m"),
            "unexpected error: {}",
            err
        );

        let bad = SAMPLE.replace("tip_margin = 0.8", "tip_margin = 1.5");
        assert!(matches!(
            DriveConfig::from_toml_str(&bad),
            Err(ConfigError::Invalid { .. })
        ));

        let bad = SAMPLE.replace("drive_gear_ratio = \"6.86:1\"", "drive_gear_ratio = \"0:1\"");
        assert!(matches!(DriveConfig::from_toml_str(&bad), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DriveConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_square_config_validates() {
        let config = DriveConfig::square(Distance::from_meters(0.6), LinearVelocity::from_mps(4.4));
        assert!(config.validate().is_ok());
        assert!(config.limiter.is_none());
    }
}
