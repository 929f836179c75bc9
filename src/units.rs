// Unit-carrying value types used by the drivetrain
//
// Everything is stored in SI internally (meters, m/s, rad/s). The types only
// exist so that a gear ratio can never be confused with a wheel diameter and
// so that conversions between motor space and wheel space live in one place.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const METERS_PER_INCH: f64 = 0.0254;
const METERS_PER_FOOT: f64 = 0.3048;
const MPS_PER_MPH: f64 = 0.44704;
const RAD_PER_SEC_PER_RPM: f64 = 2.0 * PI / 60.0;

/// Errors produced when parsing a textual gear ratio such as `"6.75:1"`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RatioParseError {
    #[error("Gear ratio '{0}' is not of the form 'lead:follower'")]
    Malformed(String),

    #[error("Gear ratio '{0}' contains a non-numeric term")]
    NotANumber(String),

    #[error("Gear ratio '{0}' must have positive, finite terms")]
    NotPositive(String),
}

/// Reduction between a motor shaft and the mechanism it drives.
///
/// `reduction` is the number of motor rotations per output rotation, so a
/// `6.75:1` swerve drive stage has a reduction of 6.75.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RatioRepr", into = "f64")]
pub struct GearRatio {
    reduction: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RatioRepr {
    Reduction(f64),
    Text(String),
}

impl TryFrom<RatioRepr> for GearRatio {
    type Error = RatioParseError;

    fn try_from(repr: RatioRepr) -> Result<Self, Self::Error> {
        match repr {
            RatioRepr::Reduction(r) => GearRatio::from_reduction(r),
            RatioRepr::Text(s) => s.parse(),
        }
    }
}

impl From<GearRatio> for f64 {
    fn from(ratio: GearRatio) -> f64 {
        ratio.reduction
    }
}

impl GearRatio {
    /// Build from a plain reduction (motor turns per output turn)
    pub fn from_reduction(reduction: f64) -> Result<Self, RatioParseError> {
        if !reduction.is_finite() || reduction <= 0.0 {
            return Err(RatioParseError::NotPositive(reduction.to_string()));
        }
        Ok(Self { reduction })
    }

    /// Build from a literal reduction the caller knows to be positive
    pub(crate) const fn reduction_unchecked(reduction: f64) -> Self {
        Self { reduction }
    }

    /// Build from lead (driving) and follower (driven) teeth counts
    pub fn from_gears(lead: f64, follower: f64) -> Result<Self, RatioParseError> {
        if !(lead.is_finite() && follower.is_finite()) || lead <= 0.0 || follower <= 0.0 {
            return Err(RatioParseError::NotPositive(format!("{}:{}", lead, follower)));
        }
        Ok(Self {
            reduction: follower / lead,
        })
    }

    pub fn reduction(&self) -> f64 {
        self.reduction
    }

    /// Chain two stages into one combined ratio
    pub fn then(&self, other: GearRatio) -> GearRatio {
        GearRatio {
            reduction: self.reduction * other.reduction,
        }
    }

    /// Motor shaft rotations -> distance travelled by a wheel on the output
    pub fn wheel_distance(&self, motor_rotations: f64, wheel_diameter: Distance) -> Distance {
        Distance::from_meters(motor_rotations / self.reduction * wheel_diameter.circumference())
    }

    /// Motor shaft RPM -> linear speed at the wheel's contact patch
    pub fn wheel_velocity(&self, motor_rpm: f64, wheel_diameter: Distance) -> LinearVelocity {
        LinearVelocity::from_mps(motor_rpm / 60.0 / self.reduction * wheel_diameter.circumference())
    }

    /// Linear wheel speed -> motor shaft RPM required to produce it
    pub fn motor_rpm(&self, velocity: LinearVelocity, wheel_diameter: Distance) -> AngularVelocity {
        let wheel_rps = velocity.mps() / wheel_diameter.circumference();
        AngularVelocity::from_rpm(wheel_rps * self.reduction * 60.0)
    }
}

impl FromStr for GearRatio {
    type Err = RatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lead, follower) = s
            .split_once(':')
            .ok_or_else(|| RatioParseError::Malformed(s.to_string()))?;
        let lead: f64 = lead
            .trim()
            .parse()
            .map_err(|_| RatioParseError::NotANumber(s.to_string()))?;
        let follower: f64 = follower
            .trim()
            .parse()
            .map_err(|_| RatioParseError::NotANumber(s.to_string()))?;

        // Written the way gearboxes are labelled: "6.75:1" is 6.75 motor turns per output turn
        if !(lead.is_finite() && follower.is_finite()) || lead <= 0.0 || follower <= 0.0 {
            return Err(RatioParseError::NotPositive(s.to_string()));
        }
        Ok(Self {
            reduction: lead / follower,
        })
    }
}

impl fmt::Display for GearRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:1", self.reduction)
    }
}

/// A length, stored in meters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distance(f64);

impl Distance {
    pub const fn from_meters(m: f64) -> Self {
        Self(m)
    }

    pub fn from_inches(inches: f64) -> Self {
        Self(inches * METERS_PER_INCH)
    }

    pub fn from_feet(feet: f64) -> Self {
        Self(feet * METERS_PER_FOOT)
    }

    pub fn meters(&self) -> f64 {
        self.0
    }

    pub fn inches(&self) -> f64 {
        self.0 / METERS_PER_INCH
    }

    /// Circumference of a wheel with this diameter
    pub fn circumference(&self) -> f64 {
        PI * self.0
    }
}

/// A signed linear velocity, stored in meters per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinearVelocity(f64);

impl LinearVelocity {
    pub const fn from_mps(mps: f64) -> Self {
        Self(mps)
    }

    pub fn from_mph(mph: f64) -> Self {
        Self(mph * MPS_PER_MPH)
    }

    pub fn mps(&self) -> f64 {
        self.0
    }

    /// Open-loop motor power for this speed given the top speed, in [-1, 1]
    pub fn to_motor_power(&self, max: LinearVelocity) -> f64 {
        if max.0 <= 0.0 {
            return 0.0;
        }
        (self.0 / max.0).clamp(-1.0, 1.0)
    }
}

/// A signed angular velocity, stored in radians per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AngularVelocity(f64);

impl AngularVelocity {
    pub const fn from_rad_per_sec(rps: f64) -> Self {
        Self(rps)
    }

    pub fn from_rpm(rpm: f64) -> Self {
        Self(rpm * RAD_PER_SEC_PER_RPM)
    }

    pub fn rad_per_sec(&self) -> f64 {
        self.0
    }

    pub fn rpm(&self) -> f64 {
        self.0 / RAD_PER_SEC_PER_RPM
    }
}
