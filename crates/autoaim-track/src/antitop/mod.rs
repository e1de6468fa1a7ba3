//! Spinning-target estimators.
//!
//! A robot spinning in place exposes each armor plate only briefly; chasing
//! the visible plate with a point tracker loses the target every quarter
//! turn. The estimators here instead model the whole robot: the observed
//! plate pose is related to a hidden center of rotation by
//!
//! ```text
//! ax = x − r·cos θ        az = z
//! ay = y − r·sin θ        φ  = θ
//! ```
//!
//! and a nine-state extended filter over
//! `(x, y, z, θ, vx, vy, vz, ω, r)` recovers the center, the spin rate and
//! the orbit radius from single-plate observations. Two `(r, z)` pairs are
//! kept and swapped whenever the visible plate toggles to an adjacent face,
//! so a glimpse of the next plate does not corrupt the current one's
//! geometry.
//!
//! [`SpinEstimator`] is the single-filter variant; [`SmoothedSpinEstimator`]
//! decomposes the problem further with a slow linear filter over the center
//! and another over the angular kinematics, trading a little latency for a
//! much steadier aim point.

mod estimator;
mod smoothed;

pub use estimator::SpinEstimator;
pub use smoothed::SmoothedSpinEstimator;

use autoaim_filter::{MeasurementModel, ProcessModel, Real};
use serde::{Deserialize, Serialize};

/// Constant-velocity process over the nine orbit states.
pub(crate) struct OrbitProcess;

impl ProcessModel<9> for OrbitProcess {
    fn apply<T: Real>(&self, x0: &[T; 9], x1: &mut [T; 9], dt: f64) {
        x1[0] = x0[0] + x0[4] * dt;
        x1[1] = x0[1] + x0[5] * dt;
        x1[2] = x0[2] + x0[6] * dt;
        x1[3] = x0[3] + x0[7] * dt;
        x1[4] = x0[4];
        x1[5] = x0[5];
        x1[6] = x0[6];
        x1[7] = x0[7];
        x1[8] = x0[8];
    }
}

/// Orbit geometry: the visible plate sits one radius from the center along
/// the heading.
pub(crate) struct OrbitMeasure;

impl MeasurementModel<9, 4> for OrbitMeasure {
    fn apply<T: Real>(&self, x: &[T; 9], y: &mut [T; 4]) {
        y[0] = x[0] - x[8] * x[3].cos();
        y[1] = x[1] - x[8] * x[3].sin();
        y[2] = x[2];
        y[3] = x[3];
    }
}

/// Tuning for the spin estimators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinConfig {
    /// Lower clamp on the orbit radius (m).
    pub r_min: f64,
    /// Upper clamp on the orbit radius (m).
    pub r_max: f64,
    /// Radius a fresh track starts from (m).
    pub initial_radius: f64,
    /// Number of armor faces on the robot.
    pub armor_count: u32,
    /// Updates required before any fire permission.
    pub fire_update: u64,
    /// Freshness horizon for fire permission (s).
    pub fire_delay: f64,
    /// Aim cone around the visible plate in follow mode (rad).
    pub fire_armor_angle: f64,
    /// Aim cone around the face-on crossing in center mode (rad).
    pub fire_center_angle: f64,
    /// Fire gate on center-velocity spread (m/s).
    pub fire_std_v: f64,
    /// Fire gate on spin-rate spread (rad/s).
    pub fire_std_w: f64,
    /// Sliding window length for the std gates.
    pub std_window: usize,
    /// Process-noise diagonal of the orbit filter.
    pub q_diag: [f64; 9],
    /// Observation-noise diagonal of the orbit filter.
    pub r_diag: [f64; 4],
}

impl SpinConfig {
    /// Validates a (possibly file-loaded) tuning before construction.
    pub fn validate(&self) -> autoaim_core::CoreResult<()> {
        use autoaim_core::CoreError;
        if self.r_min <= 0.0 {
            return Err(CoreError::invalid_parameter("r_min", self.r_min, "> 0"));
        }
        if self.r_max <= self.r_min {
            return Err(CoreError::inconsistent(format!(
                "r_max ({}) must exceed r_min ({})",
                self.r_max, self.r_min
            )));
        }
        if !(self.r_min..=self.r_max).contains(&self.initial_radius) {
            return Err(CoreError::invalid_parameter(
                "initial_radius",
                self.initial_radius,
                "within [r_min, r_max]",
            ));
        }
        if self.armor_count < 2 {
            return Err(CoreError::invalid_parameter(
                "armor_count",
                f64::from(self.armor_count),
                ">= 2",
            ));
        }
        crate::queue::validate_diag("q_diag", &self.q_diag)?;
        crate::queue::validate_diag("r_diag", &self.r_diag)
    }
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            r_min: 0.15,
            r_max: 0.4,
            initial_radius: 0.25,
            armor_count: 4,
            fire_update: 100,
            fire_delay: 0.5,
            fire_armor_angle: 0.5,
            fire_center_angle: 0.2,
            fire_std_v: 0.1,
            fire_std_w: 0.1,
            std_window: 10,
            q_diag: [
                1e-4, 1e-4, 1e-4, 1e-4, // center, heading
                1e-2, 1e-2, 1e-2, 1e-2, // their rates
                1e-4, // radius walks slowly
            ],
            r_diag: [1e-4, 1e-4, 1e-4, 4e-4],
        }
    }
}
