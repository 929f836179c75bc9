// In-process drivetrain hardware
//
// Motors, encoders and the IMU are shared handles: the drivetrain owns boxed
// clones through `DriveHardware` while the runtime (or a test) keeps the
// originals to step physics, move wheels by hand and inject faults.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ConfigError, DriveConfig, ModuleConfig};
use crate::swerve::hal::{AbsoluteEncoder, DriveHardware, ImuDriver, ModuleHardware, MotorController, SensorError};
use crate::swerve::{Corner, ModuleState, SwerveKinematics};

/// Free speed of the simulated brushless motors
pub const FREE_SPEED_RPM: f64 = 5676.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Last output written to a motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorOutput {
    Power(f64),
    Velocity(f64),
}

impl MotorOutput {
    /// Raw commanded number, power or rpm
    pub fn value(&self) -> f64 {
        match self {
            MotorOutput::Power(p) => *p,
            MotorOutput::Velocity(rpm) => *rpm,
        }
    }

    /// Shaft speed this output produces once settled
    fn rpm(&self) -> f64 {
        match self {
            MotorOutput::Power(p) => p.clamp(-1.0, 1.0) * FREE_SPEED_RPM,
            MotorOutput::Velocity(rpm) => rpm.clamp(-FREE_SPEED_RPM, FREE_SPEED_RPM),
        }
    }
}

#[derive(Debug)]
struct MotorState {
    output: MotorOutput,
    position_rotations: f64,
    velocity_rpm: f64,
    fail_reads: bool,
}

/// Motor that reaches its commanded speed instantly
#[derive(Debug, Clone)]
pub struct SimMotor {
    state: Arc<Mutex<MotorState>>,
}

impl Default for SimMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMotor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MotorState {
                output: MotorOutput::Power(0.0),
                position_rotations: 0.0,
                velocity_rpm: 0.0,
                fail_reads: false,
            })),
        }
    }

    pub fn output(&self) -> MotorOutput {
        lock(&self.state).output
    }

    pub fn set_position_rotations(&self, rotations: f64) {
        lock(&self.state).position_rotations = rotations;
    }

    pub fn set_measured_rpm(&self, rpm: f64) {
        lock(&self.state).velocity_rpm = rpm;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Advance by `dt` seconds, returning the rotations travelled
    pub fn step(&self, dt: f64) -> f64 {
        let mut state = lock(&self.state);
        state.velocity_rpm = state.output.rpm();
        let travelled = state.velocity_rpm / 60.0 * dt;
        state.position_rotations += travelled;
        travelled
    }
}

impl MotorController for SimMotor {
    fn set_power(&mut self, power: f64) {
        lock(&self.state).output = MotorOutput::Power(power);
    }

    fn set_velocity_rpm(&mut self, rpm: f64) {
        lock(&self.state).output = MotorOutput::Velocity(rpm);
    }

    fn position_rotations(&mut self) -> Result<f64, SensorError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(SensorError::ReadFailed("simulated motor read failure".into()));
        }
        Ok(state.position_rotations)
    }

    fn velocity_rpm(&mut self) -> Result<f64, SensorError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(SensorError::ReadFailed("simulated motor read failure".into()));
        }
        Ok(state.velocity_rpm)
    }
}

#[derive(Debug)]
struct EncoderState {
    turns: f64,
    failure: Option<SensorError>,
}

/// Absolute encoder with a settable reading
#[derive(Debug, Clone)]
pub struct SimEncoder {
    state: Arc<Mutex<EncoderState>>,
}

impl Default for SimEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEncoder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EncoderState {
                turns: 0.0,
                failure: None,
            })),
        }
    }

    /// Raw reading, not wrapped, so out-of-range values can be injected
    pub fn set_turns(&self, turns: f64) {
        lock(&self.state).turns = turns;
    }

    pub fn turns_value(&self) -> f64 {
        lock(&self.state).turns
    }

    pub fn fail_with(&self, error: SensorError) {
        lock(&self.state).failure = Some(error);
    }

    pub fn clear_failure(&self) {
        lock(&self.state).failure = None;
    }
}

impl AbsoluteEncoder for SimEncoder {
    fn turns(&mut self) -> Result<f64, SensorError> {
        let state = lock(&self.state);
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(state.turns),
        }
    }
}

#[derive(Debug, Default)]
struct ImuState {
    yaw_deg: f64,
    roll_deg: f64,
    pitch_deg: f64,
    calibrating: bool,
    failure: Option<SensorError>,
    /// Fails roll and pitch reads only
    attitude_failure: Option<SensorError>,
}

/// IMU with settable attitude and calibration flag
#[derive(Debug, Clone, Default)]
pub struct SimImu {
    state: Arc<Mutex<ImuState>>,
}

impl SimImu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_yaw_degrees(&self, yaw: f64) {
        lock(&self.state).yaw_deg = yaw;
    }

    pub fn yaw_degrees_value(&self) -> f64 {
        lock(&self.state).yaw_deg
    }

    pub fn set_roll_pitch_degrees(&self, roll: f64, pitch: f64) {
        let mut state = lock(&self.state);
        state.roll_deg = roll;
        state.pitch_deg = pitch;
    }

    pub fn set_calibrating(&self, calibrating: bool) {
        lock(&self.state).calibrating = calibrating;
    }

    pub fn fail_with(&self, error: SensorError) {
        lock(&self.state).failure = Some(error);
    }

    pub fn fail_attitude_with(&self, error: SensorError) {
        lock(&self.state).attitude_failure = Some(error);
    }

    pub fn clear_failure(&self) {
        let mut state = lock(&self.state);
        state.failure = None;
        state.attitude_failure = None;
    }

    fn read(&self, pick: impl Fn(&ImuState) -> f64) -> Result<f64, SensorError> {
        let state = lock(&self.state);
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(pick(&state)),
        }
    }

    fn read_attitude(&self, pick: impl Fn(&ImuState) -> f64) -> Result<f64, SensorError> {
        let attitude_failure = lock(&self.state).attitude_failure.clone();
        match attitude_failure {
            Some(e) => Err(e),
            None => self.read(pick),
        }
    }
}

impl ImuDriver for SimImu {
    fn yaw_degrees(&mut self) -> Result<f64, SensorError> {
        self.read(|s| s.yaw_deg)
    }

    fn roll_degrees(&mut self) -> Result<f64, SensorError> {
        self.read_attitude(|s| s.roll_deg)
    }

    fn pitch_degrees(&mut self) -> Result<f64, SensorError> {
        self.read_attitude(|s| s.pitch_deg)
    }

    fn is_calibrating(&mut self) -> bool {
        lock(&self.state).calibrating
    }
}

/// Handles to one simulated corner
#[derive(Debug, Clone)]
pub struct SimModule {
    pub drive: SimMotor,
    pub turn: SimMotor,
    pub encoder: SimEncoder,
    config: ModuleConfig,
}

impl SimModule {
    pub fn new(config: &ModuleConfig) -> Self {
        let module = Self {
            drive: SimMotor::new(),
            turn: SimMotor::new(),
            encoder: SimEncoder::new(),
            config: *config,
        };
        module.set_angle(0.0);
        module
    }

    /// Boxed driver clones for the drivetrain
    pub fn hardware(&self) -> ModuleHardware {
        ModuleHardware {
            drive: Box::new(self.drive.clone()),
            turn: Box::new(self.turn.clone()),
            encoder: Box::new(self.encoder.clone()),
        }
    }

    /// Point the wheel at `angle` (robot frame, radians)
    pub fn set_angle(&self, angle: f64) {
        let turns = ((angle + self.config.mount_offset) / TAU).rem_euclid(1.0);
        // rem_euclid can round up to exactly 1.0 for tiny negative inputs
        self.encoder.set_turns(if turns >= 1.0 { 0.0 } else { turns });
    }

    /// Wheel angle implied by the encoder reading
    pub fn angle(&self) -> f64 {
        self.encoder.turns_value() * TAU - self.config.mount_offset
    }

    /// Roll the wheel forward by `meters`
    pub fn add_distance(&self, meters: f64) {
        let sign = if self.config.drive_inverted { -1.0 } else { 1.0 };
        let rotations = sign * meters / self.config.wheel_diameter.circumference()
            * self.config.drive_gear_ratio.reduction();
        let current = lock(&self.drive.state).position_rotations;
        self.drive.set_position_rotations(current + rotations);
    }

    /// Advance one step, returning the wheel's state over it
    fn step(&self, dt: f64) -> ModuleState {
        let turn_rotations = self.turn.step(dt);
        let turn_sign = if self.config.turn_inverted { -1.0 } else { 1.0 };
        let steer = turn_sign * turn_rotations / self.config.turn_gear_ratio.reduction() * TAU;
        self.set_angle(self.angle() + steer);

        let drive_sign = if self.config.drive_inverted { -1.0 } else { 1.0 };
        let rotations = self.drive.step(dt);
        let meters = drive_sign * rotations / self.config.drive_gear_ratio.reduction()
            * self.config.wheel_diameter.circumference();
        ModuleState::new(meters / dt, self.angle())
    }
}

/// A whole simulated drivetrain
#[derive(Debug, Clone)]
pub struct SimDrivetrain {
    pub modules: [SimModule; 4],
    pub imu: SimImu,
    kinematics: SwerveKinematics,
    imu_inverted: bool,
}

impl SimDrivetrain {
    pub fn new(config: &DriveConfig) -> Result<Self, ConfigError> {
        let kinematics = SwerveKinematics::rectangular(config.chassis.wheelbase, config.chassis.track_width)?;
        Ok(Self {
            modules: Corner::ALL.map(|c| SimModule::new(&config.module_config(c))),
            imu: SimImu::new(),
            kinematics,
            imu_inverted: config.orientation.inverted,
        })
    }

    pub fn hardware(&self) -> DriveHardware {
        DriveHardware {
            modules: [
                self.modules[0].hardware(),
                self.modules[1].hardware(),
                self.modules[2].hardware(),
                self.modules[3].hardware(),
            ],
            imu: Box::new(self.imu.clone()),
        }
    }

    /// Move every wheel forward by `meters`
    pub fn roll_all(&self, meters: f64) {
        for module in &self.modules {
            module.add_distance(meters);
        }
    }

    /// Advance the physics by `dt` seconds. The IMU yaw follows the chassis
    /// rotation implied by the wheels.
    pub fn step(&self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let states = [
            self.modules[0].step(dt),
            self.modules[1].step(dt),
            self.modules[2].step(dt),
            self.modules[3].step(dt),
        ];
        let omega = self.kinematics.to_chassis_speeds(&states).omega;
        let sign = if self.imu_inverted { -1.0 } else { 1.0 };
        let yaw = self.imu.yaw_degrees_value() + sign * (omega * dt).to_degrees();
        self.imu.set_yaw_degrees(yaw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ChassisSpeeds, wrap_angle};
    use crate::units::{Distance, LinearVelocity};
    use approx::assert_relative_eq;

    fn config() -> DriveConfig {
        DriveConfig::square(Distance::from_meters(0.6), LinearVelocity::from_mps(4.4))
    }

    #[test]
    fn test_motor_step_integrates_output() {
        let mut motor = SimMotor::new();
        motor.set_power(0.5);
        let travelled = motor.step(0.1);
        assert_relative_eq!(travelled, 0.5 * FREE_SPEED_RPM / 60.0 * 0.1);
        assert_relative_eq!(motor.velocity_rpm().unwrap(), 0.5 * FREE_SPEED_RPM);

        motor.fail_reads(true);
        assert!(motor.position_rotations().is_err());
    }

    #[test]
    fn test_module_angle_round_trip() {
        let mut module_config = config().module_config(Corner::BackRight);
        module_config.mount_offset = 2.5;
        let module = SimModule::new(&module_config);
        module.set_angle(-1.0);
        assert_relative_eq!(wrap_angle(module.angle()), -1.0, epsilon = 1e-9);
        let turns = module.encoder.turns_value();
        assert!((0.0..1.0).contains(&turns));
    }

    #[test]
    fn test_spinning_wheels_turn_imu() {
        let config = config();
        let sim = SimDrivetrain::new(&config).unwrap();
        // Aim every wheel tangentially for a counter-clockwise spin
        let states = sim.kinematics.to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));
        let max = config.module.max_linear_velocity;
        for (module, state) in sim.modules.iter().zip(states.iter()) {
            module.set_angle(state.angle);
            let mut drive = module.drive.clone();
            drive.set_power(LinearVelocity::from_mps(state.speed).to_motor_power(max));
        }
        sim.step(0.5);
        assert!(sim.imu.yaw_degrees_value() > 0.0);
    }
}
