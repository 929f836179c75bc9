// Drivetrain facade: the only entry point callers use
//
// Owns the chassis, orientation adapter, odometry and limiter. Callers hand
// it motion requests, a per-tick intent and vision measurements; it hands
// back poses and speeds.

use std::collections::BTreeSet;
use std::f64::consts::FRAC_PI_4;

use tracing::{debug, info, warn};

use crate::config::{CalibrationPolicy, ConfigError, DriveConfig, TICK_PERIOD};
use crate::geometry::{ChassisSpeeds, Pose};
use crate::input::{DriveInput, DriveIntent};
use crate::telemetry::{Fault, FaultNotifier, TelemetrySink};

use super::chassis::{DriveReport, SwerveChassis};
use super::hal::DriveHardware;
use super::limiter::AccelerationLimiter;
use super::module::ModuleState;
use super::odometry::{OdometryError, OdometryState, SwerveOdometry};
use super::orientation::Orientation;

/// X stance, FL, FR, BL, BR
pub const LOCK_ANGLES: [f64; 4] = [FRAC_PI_4, -FRAC_PI_4, -FRAC_PI_4, FRAC_PI_4];

/// Name of the persistent fault raised when the drivetrain cannot be built
pub const CONFIG_FAULT: &str = "swerve.config";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriveError {
    #[error("IMU calibration in progress, motion request rejected")]
    CalibrationInProgress,
}

pub struct DriveCoordinator {
    config: DriveConfig,
    chassis: SwerveChassis,
    orientation: Orientation,
    odometry: SwerveOdometry,
    limiter: Option<AccelerationLimiter>,

    telemetry: Box<dyn TelemetrySink>,
    faults: Box<dyn FaultNotifier>,
    /// Names of faults currently raised
    active_faults: BTreeSet<String>,
    calibrating: bool,
}

/// Everything that can fail to build, assembled before the sinks are attached
struct Parts {
    config: DriveConfig,
    chassis: SwerveChassis,
    orientation: Orientation,
    odometry: SwerveOdometry,
    limiter: Option<AccelerationLimiter>,
}

impl Parts {
    fn assemble(config: DriveConfig, hardware: DriveHardware) -> Result<Self, ConfigError> {
        config.validate()?;
        let DriveHardware { modules, imu } = hardware;

        let chassis = SwerveChassis::new(&config, modules)?;
        let orientation = Orientation::new(imu, &config.orientation);
        let odometry = SwerveOdometry::new(chassis.kinematics().clone(), &config.odometry, Pose::default());
        let limiter = config.limiter.as_ref().map(|l| {
            AccelerationLimiter::new(
                l,
                config.chassis.wheelbase,
                config.chassis.track_width,
                TICK_PERIOD.as_secs_f64(),
            )
        });
        Ok(Self {
            config,
            chassis,
            orientation,
            odometry,
            limiter,
        })
    }
}

impl DriveCoordinator {
    /// Build the drivetrain from a configuration and its hardware
    pub fn new(
        config: DriveConfig,
        hardware: DriveHardware,
        telemetry: Box<dyn TelemetrySink>,
        faults: Box<dyn FaultNotifier>,
    ) -> Result<Self, ConfigError> {
        let parts = Parts::assemble(config, hardware)?;
        Ok(Self::from_parts(parts, telemetry, faults))
    }

    fn from_parts(parts: Parts, telemetry: Box<dyn TelemetrySink>, faults: Box<dyn FaultNotifier>) -> Self {
        let Parts {
            config,
            chassis,
            orientation,
            odometry,
            limiter,
        } = parts;

        info!(
            "Drivetrain ready: {:.3} m x {:.3} m, max {:.2} m/s, {} drive, limiter {}",
            config.chassis.wheelbase.meters(),
            config.chassis.track_width.meters(),
            config.module.max_linear_velocity.mps(),
            if config.chassis.closed_loop { "closed-loop" } else { "open-loop" },
            if limiter.is_some() { "on" } else { "off" },
        );

        Self {
            config,
            chassis,
            orientation,
            odometry,
            limiter,
            telemetry,
            faults,
            active_faults: BTreeSet::new(),
            calibrating: false,
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn chassis(&self) -> &SwerveChassis {
        &self.chassis
    }

    pub fn odometry(&self) -> &SwerveOdometry {
        &self.odometry
    }

    /// IMU calibration state as of the last `periodic()`
    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// Heading to use for field-relative requests, or an error if the IMU
    /// is calibrating and policy says to refuse motion. Field-relative
    /// requests share the pose estimate's frame; the gyro only feeds odometry.
    fn motion_heading(&mut self) -> Result<f64, DriveError> {
        if !self.orientation.is_calibrating() {
            return Ok(self.odometry.pose().heading);
        }
        match self.config.orientation.calibration_policy {
            CalibrationPolicy::Reject => {
                debug!("Motion request rejected while the IMU calibrates");
                self.stop();
                Err(DriveError::CalibrationInProgress)
            }
            CalibrationPolicy::TreatHeadingAsZero => Ok(0.0),
        }
    }

    /// Drive with explicit velocities. Units: m/s and rad/s
    pub fn drive(&mut self, vx: f64, vy: f64, omega: f64, field_relative: bool) -> Result<DriveReport, DriveError> {
        let heading = self.motion_heading()?;
        let requested = ChassisSpeeds::new(vx, vy, omega);
        let mut robot = if field_relative {
            ChassisSpeeds::from_field_relative(requested, heading)
        } else {
            requested
        };

        if let Some(limiter) = &mut self.limiter {
            let limited = limiter.limit(robot.translation());
            robot = ChassisSpeeds::new(limited.x, limited.y, robot.omega);
        }

        Ok(self.chassis.drive(robot, self.config.chassis.closed_loop))
    }

    /// Drive from one set of operator axes, shaped by the configured drive mode
    pub fn drive_with(&mut self, input: &dyn DriveInput, field_relative: bool) -> Result<DriveReport, DriveError> {
        self.drive_with_pair(input, input, field_relative)
    }

    /// Translation from one input, rotation from another
    pub fn drive_with_pair(
        &mut self,
        translation: &dyn DriveInput,
        rotation: &dyn DriveInput,
        field_relative: bool,
    ) -> Result<DriveReport, DriveError> {
        let mode = self.config.chassis.drive_mode;
        let max_linear = self.config.module.max_linear_velocity.mps();
        let max_angular = self.config.module.max_angular_velocity.rad_per_sec();
        self.drive(
            mode.apply(translation.robot_x()) * max_linear,
            mode.apply(translation.robot_y()) * max_linear,
            mode.apply(rotation.robot_twist()) * max_angular,
            field_relative,
        )
    }

    /// Hold the X stance. Bypasses kinematics and the limiter.
    pub fn lock(&mut self) -> DriveReport {
        if let Some(limiter) = &mut self.limiter {
            limiter.reset();
        }
        self.chassis.lock(LOCK_ANGLES)
    }

    /// Stop all modules
    pub fn stop(&mut self) {
        if let Some(limiter) = &mut self.limiter {
            limiter.reset();
        }
        self.chassis.stop();
    }

    /// Current heading becomes 0. Odometry keeps its position and faces 0.
    pub fn zero_gyro(&mut self) {
        self.orientation.zero();
        let pose = self.odometry.pose();
        self.reset_odometry(Some(Pose::new(pose.x, pose.y, 0.0)));
    }

    /// Re-anchor odometry at `pose`, or at the origin
    pub fn reset_odometry(&mut self, pose: Option<Pose>) {
        let pose = pose.unwrap_or_default();
        let gyro = self.orientation.heading();
        let positions = self.chassis.module_positions();
        self.odometry.reset(pose, gyro, positions);
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    /// Continuous heading of the pose estimate. Units: radians
    pub fn heading(&self) -> f64 {
        self.odometry.pose().heading
    }

    pub fn module_states(&mut self) -> [ModuleState; 4] {
        self.chassis.module_states()
    }

    /// Measured speeds in the robot frame
    pub fn robot_relative_speeds(&mut self) -> ChassisSpeeds {
        self.chassis.measured_speeds()
    }

    /// Measured speeds in the field frame
    pub fn field_relative_speeds(&mut self) -> ChassisSpeeds {
        let robot = self.robot_relative_speeds();
        ChassisSpeeds::to_field_relative(robot, self.heading())
    }

    /// Fuse an absolute pose observed at `timestamp` (same clock as `periodic`)
    pub fn add_vision_measurement(&mut self, pose: Pose, timestamp: f64) -> Result<Pose, OdometryError> {
        self.odometry.add_vision_measurement(pose, timestamp).inspect_err(|e| {
            warn!("{}", e);
        })
    }

    /// Consume one tick's intent: one-shot requests first, then motion.
    /// Returns `None` when the intent held the lock stance.
    pub fn apply_intent(&mut self, intent: &DriveIntent) -> Result<Option<DriveReport>, DriveError> {
        if intent.zero_gyro {
            self.zero_gyro();
        }
        if let Some(pose) = intent.reset_pose {
            self.reset_odometry(Some(pose));
        }
        if intent.lock {
            self.lock();
            return Ok(None);
        }
        self.drive_with(&intent.axes(), intent.field_relative).map(Some)
    }

    /// Once per tick: odometry, faults, telemetry. `now` is in seconds on a
    /// monotonic clock.
    pub fn periodic(&mut self, now: f64) {
        let calibrating = self.orientation.is_calibrating();
        if calibrating != self.calibrating {
            if calibrating {
                info!("IMU calibrating, odometry paused");
            } else {
                info!("IMU calibration finished, odometry resumes");
            }
            self.calibrating = calibrating;
        }

        if calibrating {
            self.odometry.invalidate();
        } else if self.odometry.should_update(now) {
            let gyro = self.orientation.heading();
            let positions = self.chassis.module_positions();
            self.odometry.update(now, gyro, positions);
        }

        self.orientation.refresh_attitude();
        self.report_faults();
        self.publish_telemetry();
    }

    fn report_faults(&mut self) {
        let current: Vec<Fault> = self
            .chassis
            .faults()
            .into_iter()
            .chain(self.orientation.faults())
            .collect();
        let names: BTreeSet<String> = current.iter().map(|f| f.name.clone()).collect();

        for fault in current {
            if !self.active_faults.contains(&fault.name) {
                self.faults.raise(fault);
            }
        }
        for cleared in self.active_faults.difference(&names) {
            info!("Fault cleared [{}]", cleared);
        }
        self.active_faults = names;
    }

    fn publish_telemetry(&mut self) {
        let pose = self.odometry.pose();
        let sink = self.telemetry.as_mut();
        sink.put("pose.x", pose.x.into());
        sink.put("pose.y", pose.y.into());
        sink.put("pose.heading_deg", pose.heading_degrees().into());
        sink.put(
            "odometry.tracking",
            (self.odometry.state() == OdometryState::Tracking).into(),
        );
        sink.put("imu.calibrating", self.calibrating.into());
        sink.put("drive.mode", self.config.chassis.drive_mode.name().into());
        let clamped = self.limiter.as_ref().is_some_and(|l| l.clamped());
        sink.put("limiter.clamped", clamped.into());
        self.orientation.telemetry(sink);
        self.chassis.telemetry(sink);
    }
}

/// The drivetrain as the runtime sees it: either working, or disabled by a
/// configuration problem that has been reported as a persistent fault
pub enum Drivetrain {
    Active(Box<DriveCoordinator>),
    Disabled { reason: String },
}

impl Drivetrain {
    /// Build the coordinator, turning any configuration error into a
    /// disabled drivetrain. Hardware is only created for a valid configuration.
    pub fn build<H>(
        config: Result<DriveConfig, ConfigError>,
        hardware: H,
        telemetry: Box<dyn TelemetrySink>,
        mut faults: Box<dyn FaultNotifier>,
    ) -> Drivetrain
    where
        H: FnOnce(&DriveConfig) -> Result<DriveHardware, ConfigError>,
    {
        let parts = config.and_then(|config| {
            let hardware = hardware(&config)?;
            Parts::assemble(config, hardware)
        });
        match parts {
            Ok(parts) => Drivetrain::Active(Box::new(DriveCoordinator::from_parts(parts, telemetry, faults))),
            Err(e) => {
                let reason = e.to_string();
                faults.raise(Fault::error(CONFIG_FAULT, format!("drivetrain disabled: {}", reason)).persistent());
                Drivetrain::Disabled { reason }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Drivetrain::Active(_))
    }

    pub fn coordinator_mut(&mut self) -> Option<&mut DriveCoordinator> {
        match self {
            Drivetrain::Active(c) => Some(c),
            Drivetrain::Disabled { .. } => None,
        }
    }
}
