// Four swerve modules plus the kinematics that relate them to the chassis
//
// Combines kinematics and per-module control to provide a simple API for
// driving the base and reading back what it is doing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, DriveConfig};
use crate::geometry::ChassisSpeeds;
use crate::telemetry::{Fault, TelemetrySink};

use super::Corner;
use super::hal::ModuleHardware;
use super::kinematics::SwerveKinematics;
use super::module::{ModulePosition, ModuleState, SwerveModule};

/// What one `drive()` call actually dispatched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveReport {
    /// Per-module states after desaturation and optimization, FL, FR, BL, BR
    pub states: [ModuleState; 4],
    /// Uniform factor applied to all module speeds, 1.0 when none was needed
    pub desaturation: f64,
}

impl DriveReport {
    pub fn desaturated(&self) -> bool {
        self.desaturation < 1.0
    }
}

impl Default for DriveReport {
    fn default() -> Self {
        Self {
            states: [ModuleState::default(); 4],
            desaturation: 1.0,
        }
    }
}

pub struct SwerveChassis {
    modules: [SwerveModule; 4],
    kinematics: SwerveKinematics,
    /// Units: meters/second
    max_speed: f64,
    last_report: DriveReport,
}

impl SwerveChassis {
    /// Build the chassis from validated configuration and the four corners' hardware
    pub fn new(config: &DriveConfig, hardware: [ModuleHardware; 4]) -> Result<Self, ConfigError> {
        let kinematics = SwerveKinematics::rectangular(config.chassis.wheelbase, config.chassis.track_width)?;
        let [fl, fr, bl, br] = hardware;
        let modules = [
            SwerveModule::new(Corner::FrontLeft, config.module_config(Corner::FrontLeft), fl),
            SwerveModule::new(Corner::FrontRight, config.module_config(Corner::FrontRight), fr),
            SwerveModule::new(Corner::BackLeft, config.module_config(Corner::BackLeft), bl),
            SwerveModule::new(Corner::BackRight, config.module_config(Corner::BackRight), br),
        ];
        Ok(Self {
            modules,
            kinematics,
            max_speed: config.module.max_linear_velocity.mps(),
            last_report: DriveReport::default(),
        })
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    pub fn module(&self, corner: Corner) -> &SwerveModule {
        &self.modules[corner.index()]
    }

    /// Send robot-relative chassis speeds to the modules
    pub fn drive(&mut self, speeds: ChassisSpeeds, closed_loop: bool) -> DriveReport {
        let states = self.kinematics.to_module_states(speeds);
        self.set_states(states, closed_loop)
    }

    /// Send explicit module states, desaturating them first
    pub fn set_states(&mut self, mut states: [ModuleState; 4], closed_loop: bool) -> DriveReport {
        let desaturation = SwerveKinematics::desaturate(&mut states, self.max_speed);
        if desaturation < 1.0 {
            debug!("Module speeds desaturated by {:.3}", desaturation);
        }

        let mut dispatched = [ModuleState::default(); 4];
        for (i, module) in self.modules.iter_mut().enumerate() {
            dispatched[i] = module.set_desired_state(states[i], closed_loop);
        }

        self.last_report = DriveReport {
            states: dispatched,
            desaturation,
        };
        self.last_report
    }

    /// Steer each module to a fixed angle with zero speed
    pub fn lock(&mut self, angles: [f64; 4]) -> DriveReport {
        let mut dispatched = [ModuleState::default(); 4];
        for (i, module) in self.modules.iter_mut().enumerate() {
            dispatched[i] = module.lock_at(angles[i]);
        }
        self.last_report = DriveReport {
            states: dispatched,
            desaturation: 1.0,
        };
        self.last_report
    }

    /// Stop all motors immediately
    pub fn stop(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
        self.last_report = DriveReport {
            states: self.modules.each_ref().map(|m| m.desired_state()),
            desaturation: 1.0,
        };
    }

    pub fn last_report(&self) -> &DriveReport {
        &self.last_report
    }

    /// Measured module states, FL, FR, BL, BR
    pub fn module_states(&mut self) -> [ModuleState; 4] {
        self.modules.each_mut().map(|m| m.current_state())
    }

    /// Measured robot-relative chassis speeds (forward kinematics)
    pub fn measured_speeds(&mut self) -> ChassisSpeeds {
        let states = self.module_states();
        self.kinematics.to_chassis_speeds(&states)
    }

    pub fn module_positions(&mut self) -> [ModulePosition; 4] {
        self.modules.each_mut().map(|m| m.position())
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.modules.iter().flat_map(|m| m.faults()).collect()
    }

    pub fn telemetry(&self, sink: &mut dyn TelemetrySink) {
        sink.put("chassis.desaturation", self.last_report.desaturation.into());
        for module in &self.modules {
            module.telemetry(sink);
        }
    }
}
