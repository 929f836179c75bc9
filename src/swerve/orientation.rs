// Orientation adapter over the IMU driver
//
// Heading is continuous (never wrapped) and counter-clockwise positive.
// Failed reads hold the last good value.

use tracing::{info, warn};

use crate::config::OrientationConfig;
use crate::geometry::shortest_angular_distance;
use crate::telemetry::{Fault, TelemetrySink};

use super::hal::{ImuDriver, SensorError, check_finite};

pub struct Orientation {
    imu: Box<dyn ImuDriver>,
    inverted: bool,

    /// Last raw yaw reading (radians, inversion applied), for unwrapping
    last_raw_yaw: Option<f64>,
    /// Unwrapped yaw accumulated from raw readings
    continuous_yaw: f64,
    yaw_offset: f64,
    roll_offset: f64,
    pitch_offset: f64,

    roll: f64,
    pitch: f64,
    yaw_fault: Option<SensorError>,
    /// Roll/pitch faults are tracked apart so a good yaw read cannot clear them
    attitude_fault: Option<SensorError>,
}

/// Store the outcome of a read in `slot`, logging transitions
fn record(slot: &mut Option<SensorError>, what: &str, result: Result<(), SensorError>) {
    match result {
        Ok(()) => {
            if slot.take().is_some() {
                info!("IMU {} readings recovered", what);
            }
        }
        Err(e) => {
            if slot.is_none() {
                warn!("IMU {} read failed, holding last value: {}", what, e);
            }
            *slot = Some(e);
        }
    }
}

impl Orientation {
    pub fn new(imu: Box<dyn ImuDriver>, config: &OrientationConfig) -> Self {
        let mut orientation = Self {
            imu,
            inverted: config.inverted,
            last_raw_yaw: None,
            continuous_yaw: 0.0,
            yaw_offset: 0.0,
            roll_offset: 0.0,
            pitch_offset: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw_fault: None,
            attitude_fault: None,
        };
        orientation.read_yaw();
        orientation.refresh_attitude();
        orientation
    }

    /// Update the unwrapped yaw from the driver. Works whether the driver
    /// reports a continuous angle or one wrapped to +-180 deg.
    fn read_yaw(&mut self) -> f64 {
        let reading = self.imu.yaw_degrees().and_then(check_finite);
        let result = reading.map(|deg| {
            let sign = if self.inverted { -1.0 } else { 1.0 };
            let raw = sign * deg.to_radians();
            match self.last_raw_yaw {
                Some(prev) => self.continuous_yaw += shortest_angular_distance(prev, raw),
                None => self.continuous_yaw = raw,
            }
            self.last_raw_yaw = Some(raw);
        });
        record(&mut self.yaw_fault, "yaw", result);
        self.continuous_yaw
    }

    /// Continuous heading since the last `zero()`. Units: radians
    pub fn heading(&mut self) -> f64 {
        self.read_yaw() - self.yaw_offset
    }

    /// Read roll and pitch from the driver, holding the last good values on failure
    pub fn refresh_attitude(&mut self) {
        let roll = self.imu.roll_degrees().and_then(check_finite);
        let pitch = self.imu.pitch_degrees().and_then(check_finite);
        let result = roll.and_then(|roll| {
            pitch.map(|pitch| {
                self.roll = roll.to_radians();
                self.pitch = pitch.to_radians();
            })
        });
        record(&mut self.attitude_fault, "attitude", result);
    }

    /// Roll as of the last refresh. Units: radians
    pub fn roll(&self) -> f64 {
        self.roll - self.roll_offset
    }

    /// Pitch as of the last refresh. Units: radians
    pub fn pitch(&self) -> f64 {
        self.pitch - self.pitch_offset
    }

    pub fn is_calibrating(&mut self) -> bool {
        self.imu.is_calibrating()
    }

    /// Make the current attitude the reference: heading, roll and pitch read 0
    pub fn zero(&mut self) {
        self.yaw_offset = self.read_yaw();
        self.refresh_attitude();
        self.roll_offset = self.roll;
        self.pitch_offset = self.pitch;
        info!("IMU zeroed");
    }

    /// Yaw read fault, if the heading is currently being held
    pub fn fault(&self) -> Option<&SensorError> {
        self.yaw_fault.as_ref()
    }

    pub fn faults(&self) -> Vec<Fault> {
        let yaw = self.yaw_fault.iter().map(|e| Fault::warning("swerve.imu", e.to_string()));
        let attitude = self
            .attitude_fault
            .iter()
            .map(|e| Fault::warning("swerve.imu.attitude", e.to_string()));
        yaw.chain(attitude).collect()
    }

    pub fn telemetry(&self, sink: &mut dyn TelemetrySink) {
        sink.put(
            "imu.heading_deg",
            (self.continuous_yaw - self.yaw_offset).to_degrees().into(),
        );
        sink.put("imu.roll_deg", self.roll().to_degrees().into());
        sink.put("imu.pitch_deg", self.pitch().to_degrees().into());
    }
}
