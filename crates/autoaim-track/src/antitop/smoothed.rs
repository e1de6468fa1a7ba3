//! Decomposed spin estimator.
//!
//! The single nine-state filter answers quickly but its center estimate
//! inherits every wiggle of the plate observations. This variant runs the
//! same orbit filter for the instantaneous geometry and layers two slow
//! linear filters on top of its outputs:
//!
//! - a four-state `(cx, cy, vcx, vcy)` filter over the inferred center, fed
//!   once per push. This is the aim point for center-on firing;
//! - a three-state `(θ, ω, α)` filter over the unwrapped heading, giving a
//!   steadier spin rate and its trend for crossing extrapolation.
//!
//! Optionally the plate height is smoothed by a weighted average that lets
//! near-face-on observations dominate, where the detector's z estimate is
//! most trustworthy.

use autoaim_core::{angles, Pose, Timestamp};
use autoaim_filter::{LinearKalman, LinearObservation, LinearTransition, SlideWeightedAvg};
use nalgebra::{SMatrix, Vector1, Vector2};

use super::{SpinConfig, SpinEstimator};

struct CenterTransition;

impl LinearTransition<4> for CenterTransition {
    fn matrix(&self, dt: f64) -> SMatrix<f64, 4, 4> {
        let mut a = SMatrix::identity();
        a[(0, 2)] = dt;
        a[(1, 3)] = dt;
        a
    }
}

struct CenterObservation;

impl LinearObservation<4, 2> for CenterObservation {
    fn matrix(&self) -> SMatrix<f64, 2, 4> {
        let mut h = SMatrix::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }
}

struct HeadingTransition;

impl LinearTransition<3> for HeadingTransition {
    fn matrix(&self, dt: f64) -> SMatrix<f64, 3, 3> {
        let mut a = SMatrix::identity();
        a[(0, 1)] = dt;
        a[(1, 2)] = dt;
        a[(0, 2)] = dt * dt;
        a
    }
}

struct HeadingObservation;

impl LinearObservation<3, 1> for HeadingObservation {
    fn matrix(&self) -> SMatrix<f64, 1, 3> {
        SMatrix::<f64, 1, 3>::new(1.0, 0.0, 0.0)
    }
}

/// Orbit filter plus slow center/heading filters and an optional weighted
/// height smoother.
pub struct SmoothedSpinEstimator {
    orbit: SpinEstimator,
    center: LinearKalman<4, 2>,
    heading: LinearKalman<3, 1>,
    weighted_z: Option<SlideWeightedAvg>,
    started: bool,
}

impl Default for SmoothedSpinEstimator {
    fn default() -> Self {
        Self::new(SpinConfig::default(), false)
    }
}

impl SmoothedSpinEstimator {
    /// Creates an estimator; `weighted_height` enables the face-on-weighted
    /// z smoother.
    #[must_use]
    pub fn new(cfg: SpinConfig, weighted_height: bool) -> Self {
        let mut center = LinearKalman::new();
        center.set_process_diag(&[1e-4, 1e-4, 1e-3, 1e-3]);
        center.set_measurement_diag(&[1e-3, 1e-3]);
        let mut heading = LinearKalman::new();
        heading.set_process_diag(&[1e-4, 1e-3, 1e-2]);
        heading.set_measurement_diag(&[1e-4]);
        Self {
            orbit: SpinEstimator::new(cfg),
            center,
            heading,
            weighted_z: weighted_height.then(|| SlideWeightedAvg::new(100)),
            started: false,
        }
    }

    /// Re-tunes the center filter noise diagonals.
    pub fn set_center_noise(&mut self, q: &[f64; 4], r: &[f64; 2]) {
        self.center.set_process_diag(q);
        self.center.set_measurement_diag(r);
    }

    /// Re-tunes the heading filter noise diagonals.
    pub fn set_heading_noise(&mut self, q: &[f64; 3], r: &[f64; 1]) {
        self.heading.set_process_diag(q);
        self.heading.set_measurement_diag(r);
    }

    /// Consumes one plate observation; see [`SpinEstimator::push`].
    pub fn push(&mut self, pose: &Pose, t: Timestamp) -> bool {
        let last_t = self.orbit.last_t;
        if !self.orbit.push(pose, t) {
            if self.orbit.last_t.is_none() {
                // The orbit filter restarted; follow it down.
                self.restart();
            }
            return false;
        }

        let x = *self.orbit.model.state();
        if !self.started {
            let c = self.center.state_mut();
            c[0] = x[0];
            c[1] = x[1];
            let h = self.heading.state_mut();
            h[0] = x[3];
            self.started = true;
        } else if let Some(last_t) = last_t {
            let dt = t.duration_since(&last_t);
            self.center.predict(&CenterTransition, dt);
            self.center
                .update(&CenterObservation, &Vector2::new(x[0], x[1]));
            let unwrapped = angles::align(self.heading.state()[0], x[3]);
            self.heading.predict(&HeadingTransition, dt);
            self.heading.update(&HeadingObservation, &Vector1::new(unwrapped));
        }

        if let Some(wz) = &mut self.weighted_z {
            // Near face-on the detector's height estimate is at its best.
            let weight = pose.aim_offset().cos().max(0.0);
            wz.push(pose.z, weight);
        }
        true
    }

    fn restart(&mut self) {
        self.center.reset();
        self.heading.reset();
        if let Some(wz) = &mut self.weighted_z {
            wz.clear();
        }
        self.started = false;
    }

    /// Drops all learned state.
    pub fn reset(&mut self) {
        self.orbit.reset();
        self.restart();
    }

    /// The underlying orbit estimator (live geometry, toggles, radius).
    #[must_use]
    pub fn orbit(&self) -> &SpinEstimator {
        &self.orbit
    }

    /// Smoothed spin rate from the heading filter.
    #[must_use]
    pub fn omega(&self) -> f64 {
        self.heading.state()[1]
    }

    /// Spin-rate trend (rad/s²).
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.heading.state()[2]
    }

    /// Predicted plate pose; see [`SpinEstimator::pose_at`].
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        self.orbit.pose_at(delay)
    }

    /// Smoothed center `delay` seconds past the last update.
    ///
    /// Position comes from the slow center filter; height from the weighted
    /// smoother when enabled, else the orbit filter; yaw carries the
    /// extrapolated heading.
    #[must_use]
    pub fn center_at(&self, delay: f64) -> Pose {
        let c = self.center.state();
        let z = match &self.weighted_z {
            Some(wz) if !wz.is_empty() => wz.mean(),
            _ => self.orbit.model.state()[2],
        };
        let theta = self.heading.state()[0] + self.omega() * delay;
        Pose::new(
            c[0] + c[2] * delay,
            c[1] + c[3] * delay,
            z,
            angles::align(0.0, theta),
        )
    }

    /// Follow-armor fire permission; see [`SpinEstimator::fire_armor`].
    #[must_use]
    pub fn fire_armor(&self, pose: &Pose, now: Timestamp) -> bool {
        self.orbit.fire_armor(pose, now)
    }

    /// Center-on fire permission using the smoothed spin rate.
    #[must_use]
    pub fn fire_center(&self, now: Timestamp, tof: f64) -> bool {
        let Some(last_t) = self.orbit.last_t else { return false };
        let age = now.duration_since(&last_t);
        if self.orbit.updates < self.orbit.cfg.fire_update || age > self.orbit.cfg.fire_delay {
            return false;
        }
        self.orbit.face_crossing(age + tof, self.omega())
    }

    /// Diagnostic lines.
    #[must_use]
    pub fn state_strings(&self) -> Vec<String> {
        let mut lines = self.orbit.state_strings();
        let c = self.center.state();
        lines.push(format!(
            "smooth: c=({:.2}, {:.2}) vc=({:.2}, {:.2}) w={:.2} a={:.2}",
            c[0],
            c[1],
            c[2],
            c[3],
            self.omega(),
            self.alpha()
        ));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn t(frame: u32) -> Timestamp {
        Timestamp::new(300, 0).offset(frame as f64 * 0.02)
    }

    fn orbit_pose(theta: f64) -> Pose {
        Pose::new(
            2.0 - 0.2 * theta.cos(),
            0.0 - 0.2 * theta.sin(),
            0.1,
            angles::align(0.0, theta),
        )
    }

    #[test]
    fn test_smoothed_center_is_steady() {
        let mut spin = SmoothedSpinEstimator::default();
        let omega = PI;
        let mut centers = Vec::new();
        for f in 0..150 {
            let theta = omega * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
            if f >= 100 {
                let c = spin.center_at(0.0);
                centers.push((c.x, c.y));
            }
        }
        // Settled center stays within a tight box around the truth.
        for (x, y) in centers {
            assert_relative_eq!(x, 2.0, epsilon = 0.08);
            assert_relative_eq!(y, 0.0, epsilon = 0.08);
        }
    }

    #[test]
    fn test_smoothed_omega_tracks_spin() {
        let mut spin = SmoothedSpinEstimator::default();
        let omega = 2.0;
        for f in 0..200 {
            let theta = omega * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
        }
        assert_relative_eq!(spin.omega(), 2.0, epsilon = 0.3);
    }

    #[test]
    fn test_weighted_height_prefers_face_on() {
        let mut spin = SmoothedSpinEstimator::new(SpinConfig::default(), true);
        let omega = PI;
        for f in 0..200 {
            let theta = omega * f as f64 * 0.02;
            // Height error grows with aim offset: face-on samples read 0.1,
            // edge-on samples read high.
            let mut pose = orbit_pose(theta);
            pose.z = 0.1 + 0.2 * pose.aim_offset().sin().abs();
            spin.push(&pose, t(f));
        }
        let z = spin.center_at(0.0).z;
        // The weighted mean leans toward the face-on (accurate) samples.
        assert!(z < 0.22, "weighted height {z} should lean toward 0.1");
    }

    #[test]
    fn test_fire_center_when_spinning() {
        let mut spin = SmoothedSpinEstimator::new(
            SpinConfig {
                fire_update: 50,
                fire_center_angle: 0.3,
                ..SpinConfig::default()
            },
            false,
        );
        let omega = PI;
        for f in 0..150 {
            let theta = omega * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
        }
        // With four faces at π rad/s, some face crosses the center line
        // within half a face period; a generous TOF always fires.
        assert!(spin.fire_center(t(149).offset(0.01), 0.5));
    }
}
