// One swerve corner: a steering motor, a drive motor and their encoders
//
// Commands go through angle optimization, the steering PID and either
// open-loop power or the drive controller's velocity loop. Sensor faults
// degrade this module only: it stops and holds the last good readings.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ModuleConfig, TICK_PERIOD};
use crate::geometry::{shortest_angular_distance, wrap_angle};
use crate::telemetry::{Fault, TelemetrySink};
use crate::units::LinearVelocity;

use super::Corner;
use super::hal::{ModuleHardware, SensorError, check_finite};
use super::pid::PidController;

/// Speed and direction of one wheel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Signed. Units: meters/second
    pub speed: f64,
    /// Units: radians, Frame: robot
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }
}

/// Cumulative wheel travel and current direction, consumed by odometry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModulePosition {
    /// Units: meters
    pub distance: f64,
    /// Units: radians, Frame: robot
    pub angle: f64,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: f64) -> Self {
        Self { distance, angle }
    }
}

/// Pick the equivalent target that needs at most 90° of steering.
///
/// A target more than 90° away is replaced by the opposite angle with the
/// speed reversed. Exactly 90° is left alone.
pub fn optimize(target: ModuleState, current_angle: f64) -> ModuleState {
    let target = ModuleState::new(target.speed, wrap_angle(target.angle));
    if shortest_angular_distance(current_angle, target.angle).abs() > FRAC_PI_2 {
        ModuleState::new(-target.speed, wrap_angle(target.angle + PI))
    } else {
        target
    }
}

pub struct SwerveModule {
    corner: Corner,
    config: ModuleConfig,
    hw: ModuleHardware,
    turn_pid: PidController,

    // Last good sensor readings
    angle: f64,
    distance: f64,
    velocity: f64,

    /// Steering target kept while the requested speed is inside the deadband
    target_angle: f64,
    /// Last state actually commanded (after optimization and clamping)
    desired: ModuleState,
    drive_clamped: bool,

    steer_fault: Option<SensorError>,
    drive_fault: Option<SensorError>,
}

impl SwerveModule {
    pub fn new(corner: Corner, config: ModuleConfig, hardware: ModuleHardware) -> Self {
        let turn_pid = PidController::new(config.turn_pid, TICK_PERIOD.as_secs_f64())
            .with_continuous_input()
            .with_output_limit(1.0);
        let mut module = Self {
            corner,
            config,
            hw: hardware,
            turn_pid,
            angle: 0.0,
            distance: 0.0,
            velocity: 0.0,
            target_angle: 0.0,
            desired: ModuleState::default(),
            drive_clamped: false,
            steer_fault: None,
            drive_fault: None,
        };
        module.target_angle = module.read_angle();
        module.desired = ModuleState::new(0.0, module.target_angle);
        module.read_distance();
        module
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    fn drive_sign(&self) -> f64 {
        if self.config.drive_inverted { -1.0 } else { 1.0 }
    }

    /// Steering angle from the absolute encoder, or the last good one
    fn read_angle(&mut self) -> f64 {
        let reading = self.hw.encoder.turns().and_then(check_finite).and_then(|turns| {
            if (0.0..1.0).contains(&turns) {
                Ok(turns)
            } else {
                Err(SensorError::OutOfRange {
                    value: turns,
                    min: 0.0,
                    max: 1.0,
                })
            }
        });

        match reading {
            Ok(turns) => {
                if self.steer_fault.take().is_some() {
                    info!("{} steering encoder recovered", self.corner.key());
                }
                self.angle = wrap_angle(turns * TAU - self.config.mount_offset);
            }
            Err(e) => {
                if self.steer_fault.is_none() {
                    warn!(
                        "{} steering encoder fault, module stopped at {:.1} deg: {}",
                        self.corner.key(),
                        self.angle.to_degrees(),
                        e
                    );
                }
                self.steer_fault = Some(e);
            }
        }
        self.angle
    }

    fn note_drive_read(&mut self, result: Result<(), SensorError>) {
        match result {
            Ok(()) => {
                if self.drive_fault.take().is_some() {
                    info!("{} drive encoder recovered", self.corner.key());
                }
            }
            Err(e) => {
                if self.drive_fault.is_none() {
                    warn!("{} drive encoder fault, holding last reading: {}", self.corner.key(), e);
                }
                self.drive_fault = Some(e);
            }
        }
    }

    fn read_distance(&mut self) -> f64 {
        let result = self.hw.drive.position_rotations().and_then(check_finite);
        let result = result.map(|rotations| {
            self.distance = self.drive_sign()
                * self
                    .config
                    .drive_gear_ratio
                    .wheel_distance(rotations, self.config.wheel_diameter)
                    .meters();
        });
        self.note_drive_read(result);
        self.distance
    }

    fn read_velocity(&mut self) -> f64 {
        let result = self.hw.drive.velocity_rpm().and_then(check_finite);
        let result = result.map(|rpm| {
            self.velocity = self.drive_sign()
                * self
                    .config
                    .drive_gear_ratio
                    .wheel_velocity(rpm, self.config.wheel_diameter)
                    .mps();
        });
        self.note_drive_read(result);
        self.velocity
    }

    /// Measured speed and angle
    pub fn current_state(&mut self) -> ModuleState {
        let speed = self.read_velocity();
        ModuleState::new(speed, self.read_angle())
    }

    /// Measured cumulative distance and angle
    pub fn position(&mut self) -> ModulePosition {
        let distance = self.read_distance();
        ModulePosition::new(distance, self.read_angle())
    }

    /// Command a speed and direction.
    ///
    /// Returns the state actually dispatched. A module with a steering
    /// encoder fault stops instead.
    pub fn set_desired_state(&mut self, target: ModuleState, closed_loop: bool) -> ModuleState {
        let current = self.read_angle();
        if self.steer_fault.is_some() {
            self.halt();
            return self.desired;
        }

        let max = self.config.max_linear_velocity.mps();
        let mut speed = target.speed;
        self.drive_clamped = speed.abs() > max;
        if self.drive_clamped {
            debug!("{} drive request {:.3} m/s clamped to {:.3}", self.corner.key(), speed, max);
            speed = speed.clamp(-max, max);
        }

        let requested = if speed.abs() < self.config.speed_deadband {
            // Too slow for the angle to mean anything, hold the wheel where it is aimed
            ModuleState::new(0.0, self.target_angle)
        } else {
            ModuleState::new(speed, target.angle)
        };
        let optimized = optimize(requested, current);

        self.steer_toward(current, optimized.angle);
        self.drive_at(optimized.speed, closed_loop);
        self.desired = optimized;
        optimized
    }

    /// Steer to a fixed angle with the drive stopped. Bypasses the deadband
    /// and optimization so the wheel ends up at exactly `angle`.
    pub fn lock_at(&mut self, angle: f64) -> ModuleState {
        let current = self.read_angle();
        if self.steer_fault.is_some() {
            self.halt();
            return self.desired;
        }
        let angle = wrap_angle(angle);
        self.drive_clamped = false;
        self.steer_toward(current, angle);
        self.drive_at(0.0, false);
        self.desired = ModuleState::new(0.0, angle);
        self.desired
    }

    /// Zero both outputs, keeping the steering target
    pub fn stop(&mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.hw.drive.set_power(0.0);
        self.hw.turn.set_power(0.0);
        self.turn_pid.reset();
        self.drive_clamped = false;
        self.desired = ModuleState::new(0.0, self.target_angle);
    }

    fn steer_toward(&mut self, current: f64, angle: f64) {
        self.target_angle = angle;
        let mut power = self.turn_pid.calculate(current, angle);
        if self.config.turn_inverted {
            power = -power;
        }
        self.hw.turn.set_power(power);
    }

    fn drive_at(&mut self, speed: f64, closed_loop: bool) {
        let velocity = LinearVelocity::from_mps(speed * self.drive_sign());
        if closed_loop {
            let rpm = self
                .config
                .drive_gear_ratio
                .motor_rpm(velocity, self.config.wheel_diameter);
            self.hw.drive.set_velocity_rpm(rpm.rpm());
        } else {
            self.hw
                .drive
                .set_power(velocity.to_motor_power(self.config.max_linear_velocity));
        }
    }

    /// Last dispatched state
    pub fn desired_state(&self) -> ModuleState {
        self.desired
    }

    /// Steering encoder fault, if the module is currently degraded
    pub fn fault(&self) -> Option<&SensorError> {
        self.steer_fault.as_ref()
    }

    pub fn drive_fault(&self) -> Option<&SensorError> {
        self.drive_fault.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.steer_fault.is_some()
    }

    /// Whether the last command asked for more than the module's top speed
    pub fn drive_clamped(&self) -> bool {
        self.drive_clamped
    }

    /// Currently active faults, named `swerve.<corner>.<sensor>`
    pub fn faults(&self) -> Vec<Fault> {
        let mut faults = Vec::new();
        if let Some(e) = &self.steer_fault {
            faults.push(Fault::error(
                format!("swerve.{}.steer_encoder", self.corner.key()),
                format!("module stopped: {}", e),
            ));
        }
        if let Some(e) = &self.drive_fault {
            faults.push(Fault::warning(
                format!("swerve.{}.drive_encoder", self.corner.key()),
                e.to_string(),
            ));
        }
        faults
    }

    pub fn telemetry(&self, sink: &mut dyn TelemetrySink) {
        let key = self.corner.key();
        sink.put(&format!("{}.angle_deg", key), self.angle.to_degrees().into());
        sink.put(&format!("{}.speed", key), self.velocity.into());
        sink.put(&format!("{}.distance", key), self.distance.into());
        sink.put(&format!("{}.target_angle_deg", key), self.desired.angle.to_degrees().into());
        sink.put(&format!("{}.target_speed", key), self.desired.speed.into());
        sink.put(&format!("{}.drive_clamped", key), self.drive_clamped.into());
        sink.put(&format!("{}.degraded", key), self.is_degraded().into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriveConfig;
    use crate::sim::{MotorOutput, SimModule};
    use crate::telemetry::FrameSink;
    use crate::units::{Distance, LinearVelocity};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn module_config() -> ModuleConfig {
        DriveConfig::square(Distance::from_meters(0.6), LinearVelocity::from_mps(4.4))
            .module_config(Corner::FrontLeft)
    }

    fn module_at(angle: f64) -> (SwerveModule, SimModule) {
        let config = module_config();
        let sim = SimModule::new(&config);
        sim.set_angle(angle);
        let module = SwerveModule::new(Corner::FrontLeft, config, sim.hardware());
        (module, sim)
    }

    #[test]
    fn test_optimize_flips_beyond_90() {
        let out = optimize(ModuleState::new(2.0, 170f64.to_radians()), 0.0);
        assert_relative_eq!(out.speed, -2.0);
        assert_relative_eq!(out.angle, (-10f64).to_radians(), epsilon = 1e-12);

        let out = optimize(ModuleState::new(1.0, -100f64.to_radians()), 0.0);
        assert_relative_eq!(out.speed, -1.0);
        assert_relative_eq!(out.angle, 80f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn test_optimize_exactly_90_never_flips() {
        let out = optimize(ModuleState::new(1.5, FRAC_PI_2), 0.0);
        assert_eq!(out, ModuleState::new(1.5, FRAC_PI_2));

        let out = optimize(ModuleState::new(1.5, -FRAC_PI_2), 0.0);
        assert_eq!(out, ModuleState::new(1.5, -FRAC_PI_2));
    }

    #[test]
    fn test_optimize_never_steers_more_than_90() {
        for current_deg in (-180..180).step_by(15) {
            for target_deg in (-360..360).step_by(20) {
                let current = f64::from(current_deg).to_radians();
                let out = optimize(ModuleState::new(1.0, f64::from(target_deg).to_radians()), current);
                assert!(shortest_angular_distance(current, out.angle).abs() <= FRAC_PI_2 + 1e-12);
                assert_relative_eq!(out.speed.abs(), 1.0);
            }
        }
    }

    #[test]
    fn test_open_loop_drive_power() {
        let (mut module, sim) = module_at(0.0);
        let sent = module.set_desired_state(ModuleState::new(2.2, 0.0), false);
        assert_relative_eq!(sent.speed, 2.2);
        match sim.drive.output() {
            MotorOutput::Power(p) => assert_relative_eq!(p, 0.5),
            other => panic!("expected open-loop power, got {:?}", other),
        }
        // Already aimed, so no steering effort
        assert_relative_eq!(sim.turn.output().value(), 0.0);
    }

    #[test]
    fn test_closed_loop_drive_rpm() {
        let (mut module, sim) = module_at(0.0);
        let config = module_config();
        module.set_desired_state(ModuleState::new(2.0, 0.0), true);
        let expected = config
            .drive_gear_ratio
            .motor_rpm(LinearVelocity::from_mps(2.0), config.wheel_diameter)
            .rpm();
        match sim.drive.output() {
            MotorOutput::Velocity(rpm) => assert_relative_eq!(rpm, expected),
            other => panic!("expected velocity command, got {:?}", other),
        }
    }

    #[test]
    fn test_overspeed_is_clamped_and_reported() {
        let (mut module, sim) = module_at(0.0);
        let sent = module.set_desired_state(ModuleState::new(9.0, 0.0), false);
        assert_relative_eq!(sent.speed, 4.4);
        assert!(module.drive_clamped());
        assert_relative_eq!(sim.drive.output().value(), 1.0);

        let mut sink = FrameSink::new();
        module.telemetry(&mut sink);
        assert_eq!(sink.get("front_left.drive_clamped"), Some(&true.into()));
    }

    #[test]
    fn test_steering_uses_optimized_angle() {
        let (mut module, sim) = module_at(0.0);
        // 135 deg away: drive backwards and steer toward -45 deg
        let sent = module.set_desired_state(ModuleState::new(1.0, 3.0 * FRAC_PI_4), false);
        assert_relative_eq!(sent.speed, -1.0);
        assert_relative_eq!(sent.angle, -FRAC_PI_4, epsilon = 1e-12);
        assert!(sim.turn.output().value() < 0.0);
        assert!(sim.drive.output().value() < 0.0);
    }

    #[test]
    fn test_deadband_holds_previous_angle() {
        let (mut module, sim) = module_at(0.0);
        module.set_desired_state(ModuleState::new(1.0, 0.5), false);
        sim.set_angle(0.5);

        let sent = module.set_desired_state(ModuleState::new(0.001, -1.2), false);
        assert_eq!(sent.speed, 0.0);
        assert_relative_eq!(sent.angle, 0.5, epsilon = 1e-9);
        assert_relative_eq!(sim.drive.output().value(), 0.0);
    }

    #[test]
    fn test_lock_bypasses_deadband() {
        let (mut module, sim) = module_at(0.0);
        let sent = module.lock_at(FRAC_PI_4);
        assert_eq!(sent, ModuleState::new(0.0, FRAC_PI_4));
        assert!(sim.turn.output().value() > 0.0);
        assert_relative_eq!(sim.drive.output().value(), 0.0);
    }

    #[test]
    fn test_turn_inversion_flips_steering_power() {
        let mut config = module_config();
        config.turn_inverted = true;
        let sim = SimModule::new(&config);
        let mut module = SwerveModule::new(Corner::FrontLeft, config, sim.hardware());
        module.set_desired_state(ModuleState::new(1.0, 0.5), false);
        assert!(sim.turn.output().value() < 0.0);
    }

    #[test]
    fn test_drive_inversion_is_transparent() {
        let mut config = module_config();
        config.drive_inverted = true;
        let sim = SimModule::new(&config);
        let mut module = SwerveModule::new(Corner::FrontLeft, config, sim.hardware());
        module.set_desired_state(ModuleState::new(2.2, 0.0), false);
        assert_relative_eq!(sim.drive.output().value(), -0.5);

        sim.drive.set_position_rotations(-config.drive_gear_ratio.reduction());
        let position = module.position();
        assert_relative_eq!(position.distance, config.wheel_diameter.circumference(), epsilon = 1e-12);
    }

    #[test]
    fn test_mount_offset_is_removed() {
        let mut config = module_config();
        config.mount_offset = 90f64.to_radians();
        let sim = SimModule::new(&config);
        sim.set_angle(0.3);
        let mut module = SwerveModule::new(Corner::FrontLeft, config, sim.hardware());
        assert_relative_eq!(module.current_state().angle, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_steer_encoder_fault_degrades_module() {
        let (mut module, sim) = module_at(0.4);
        module.set_desired_state(ModuleState::new(1.0, 0.4), false);

        sim.encoder.fail_with(SensorError::ReadFailed("unplugged".into()));
        let sent = module.set_desired_state(ModuleState::new(3.0, -1.0), false);
        assert_eq!(sent.speed, 0.0);
        assert_relative_eq!(sim.drive.output().value(), 0.0);
        assert_relative_eq!(sim.turn.output().value(), 0.0);
        assert!(module.is_degraded());
        assert!(matches!(module.fault(), Some(SensorError::ReadFailed(_))));
        assert_relative_eq!(module.current_state().angle, 0.4, epsilon = 1e-9);
        assert_eq!(module.faults()[0].name, "swerve.front_left.steer_encoder");

        // A good reading brings the module back
        sim.encoder.clear_failure();
        module.set_desired_state(ModuleState::new(1.0, 0.4), false);
        assert!(!module.is_degraded());
        assert!(sim.drive.output().value() > 0.0);
    }

    #[test]
    fn test_out_of_range_encoder_is_a_fault() {
        let (mut module, sim) = module_at(0.0);
        sim.encoder.set_turns(1.25);
        module.current_state();
        assert!(matches!(module.fault(), Some(SensorError::OutOfRange { .. })));
        sim.encoder.set_turns(f64::NAN);
        module.current_state();
        assert_eq!(module.fault(), Some(&SensorError::NotFinite));
    }

    #[test]
    fn test_drive_encoder_fault_holds_position() {
        let (mut module, sim) = module_at(0.0);
        sim.drive.set_position_rotations(module_config().drive_gear_ratio.reduction());
        let before = module.position().distance;

        sim.drive.fail_reads(true);
        sim.drive.set_position_rotations(100.0);
        assert_eq!(module.position().distance, before);
        assert!(module.drive_fault().is_some());
        assert!(!module.is_degraded());
    }
}
