pub mod config;
pub mod geometry;
pub mod input;
pub mod messages;
pub mod runtime;
pub mod sim;
pub mod swerve;
pub mod telemetry;
pub mod units;
