// Velocity-feasibility limiter
//
// Bounds how fast the commanded translation may change so the robot neither
// skids nor tips. The reachable change per tick is an ellipse whose semi-axes
// are the longitudinal and lateral acceleration limits.

use nalgebra::Vector2;
use tracing::debug;

use crate::config::LimiterConfig;
use crate::units::Distance;

/// Standard gravity. Units: m/s²
pub const GRAVITY: f64 = 9.80665;

#[derive(Debug, Clone)]
pub struct AccelerationLimiter {
    /// Per-axis acceleration bounds (x forward, y left). Units: m/s²
    max_accel: Vector2<f64>,
    /// Units: seconds
    period: f64,
    /// Last robot-relative translation let through
    prev: Vector2<f64>,
    clamped: bool,
}

/// Smallest of the friction, tipping and traction limits along one axis
fn axis_limit(config: &LimiterConfig, support_span: Distance) -> f64 {
    let friction = config.friction_coefficient * GRAVITY;
    let tipping = config.tip_margin * GRAVITY * (support_span.meters() / 2.0) / config.cg_height_m;
    let traction = config.max_drive_force_n / config.mass_kg;
    friction.min(tipping).min(traction)
}

impl AccelerationLimiter {
    pub fn new(config: &LimiterConfig, wheelbase: Distance, track_width: Distance, period: f64) -> Self {
        let max_accel = Vector2::new(axis_limit(config, wheelbase), axis_limit(config, track_width));
        debug!(
            "Acceleration limits: {:.2} m/s² longitudinal, {:.2} m/s² lateral",
            max_accel.x, max_accel.y
        );
        Self {
            max_accel,
            period,
            prev: Vector2::zeros(),
            clamped: false,
        }
    }

    pub fn max_acceleration(&self) -> Vector2<f64> {
        self.max_accel
    }

    /// Limit a requested robot-relative translation velocity. A change that
    /// falls outside the ellipse is scaled back along its own direction.
    pub fn limit(&mut self, requested: Vector2<f64>) -> Vector2<f64> {
        let dv = requested - self.prev;
        let bound = self.max_accel * self.period;
        let extent = (dv.x / bound.x).powi(2) + (dv.y / bound.y).powi(2);

        self.clamped = extent > 1.0;
        let allowed = if self.clamped { dv / extent.sqrt() } else { dv };
        self.prev += allowed;
        self.prev
    }

    /// Forget the previous command, e.g. after a stop or lock
    pub fn reset(&mut self) {
        self.prev = Vector2::zeros();
        self.clamped = false;
    }

    /// Whether the last `limit()` call had to clamp
    pub fn clamped(&self) -> bool {
        self.clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> LimiterConfig {
        LimiterConfig {
            mass_kg: 50.0,
            cg_height_m: 0.5,
            friction_coefficient: 1.0,
            tip_margin: 1.0,
            max_drive_force_n: 1000.0,
        }
    }

    #[test]
    fn test_axis_limits_pick_the_smallest() {
        // x: friction 9.81, tipping g*0.3/0.5 = 5.88, traction 20 -> tipping
        // y: tipping g*0.2/0.5 = 3.92
        let limiter = AccelerationLimiter::new(&config(), Distance::from_meters(0.6), Distance::from_meters(0.4), 0.02);
        assert_relative_eq!(limiter.max_acceleration().x, GRAVITY * 0.3 / 0.5, epsilon = 1e-12);
        assert_relative_eq!(limiter.max_acceleration().y, GRAVITY * 0.2 / 0.5, epsilon = 1e-12);

        let weak = LimiterConfig {
            max_drive_force_n: 100.0,
            ..config()
        };
        let limiter = AccelerationLimiter::new(&weak, Distance::from_meters(0.6), Distance::from_meters(0.4), 0.02);
        assert_relative_eq!(limiter.max_acceleration().x, 2.0);
    }

    #[test]
    fn test_small_changes_pass_through() {
        let mut limiter = AccelerationLimiter::new(&config(), Distance::from_meters(0.6), Distance::from_meters(0.6), 0.02);
        let out = limiter.limit(Vector2::new(0.05, 0.05));
        assert_eq!(out, Vector2::new(0.05, 0.05));
        assert!(!limiter.clamped());
    }

    #[test]
    fn test_radial_clamp_preserves_direction() {
        let mut limiter = AccelerationLimiter::new(&config(), Distance::from_meters(0.6), Distance::from_meters(0.4), 0.02);
        let requested = Vector2::new(3.0, -4.0);
        let out = limiter.limit(requested);
        assert!(limiter.clamped());

        // Same direction, ends on the ellipse boundary
        assert_relative_eq!(out.normalize(), requested.normalize(), epsilon = 1e-12);
        let bound = limiter.max_acceleration() * 0.02;
        let extent = (out.x / bound.x).powi(2) + (out.y / bound.y).powi(2);
        assert_relative_eq!(extent, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ramps_up_and_resets() {
        let mut limiter = AccelerationLimiter::new(&config(), Distance::from_meters(0.6), Distance::from_meters(0.6), 0.02);
        let step = limiter.max_acceleration().x * 0.02;
        let mut out = Vector2::zeros();
        for _ in 0..5 {
            out = limiter.limit(Vector2::new(4.0, 0.0));
        }
        assert_relative_eq!(out.x, 5.0 * step, epsilon = 1e-12);

        limiter.reset();
        let out = limiter.limit(Vector2::new(4.0, 0.0));
        assert_relative_eq!(out.x, step, epsilon = 1e-12);
    }

    #[test]
    fn test_deceleration_is_limited_too() {
        let mut limiter = AccelerationLimiter::new(&config(), Distance::from_meters(0.6), Distance::from_meters(0.6), 0.02);
        let step = limiter.max_acceleration().x * 0.02;
        for _ in 0..100 {
            limiter.limit(Vector2::new(1.0, 0.0));
        }
        let out = limiter.limit(Vector2::zeros());
        assert_relative_eq!(out.x, 1.0 - step, epsilon = 1e-12);
    }
}
