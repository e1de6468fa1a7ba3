//! Single-filter spin estimator.

use autoaim_core::{angles, Pose, Timestamp};
use autoaim_filter::ekf::propagate_state;
use autoaim_filter::{ExtendedKalman, SlideStd};
use tracing::{debug, warn};

use super::{OrbitMeasure, OrbitProcess, SpinConfig};

/// Whole-robot rotational model driven by single-plate observations.
///
/// Feed it the pose stream of the currently tracked plate (typically the
/// tracking queue's nominated target); query the predicted plate pose, the
/// hidden center, the spin rate, and the two fire modes.
pub struct SpinEstimator {
    pub(crate) cfg: SpinConfig,
    pub(crate) model: ExtendedKalman<9, 4>,
    /// (radius, height) of the two alternating face pairs; the live estimate
    /// in the filter always describes the pair at `pair`.
    pub(crate) radius: [f64; 2],
    pub(crate) height: [f64; 2],
    pub(crate) pair: usize,
    toggles: i32,
    pub(crate) updates: u64,
    pub(crate) last_t: Option<Timestamp>,
    v_std: SlideStd,
    w_std: SlideStd,
}

impl Default for SpinEstimator {
    fn default() -> Self {
        Self::new(SpinConfig::default())
    }
}

impl SpinEstimator {
    /// Creates an estimator with the given tuning.
    #[must_use]
    pub fn new(cfg: SpinConfig) -> Self {
        let mut model = ExtendedKalman::new();
        model.set_process_diag(&cfg.q_diag);
        model.set_measurement_diag(&cfg.r_diag);
        let r0 = cfg.initial_radius;
        let window = cfg.std_window;
        Self {
            cfg,
            model,
            radius: [r0; 2],
            height: [0.0; 2],
            pair: 0,
            toggles: 0,
            updates: 0,
            last_t: None,
            v_std: SlideStd::new(window),
            w_std: SlideStd::new(window),
        }
    }

    /// Drops all learned state; the next push reseeds from its observation.
    pub fn reset(&mut self) {
        self.model.reset();
        self.radius = [self.cfg.initial_radius; 2];
        self.height = [0.0; 2];
        self.pair = 0;
        self.updates = 0;
        self.last_t = None;
        self.v_std.clear();
        self.w_std.clear();
    }

    /// Consumes one plate observation.
    ///
    /// Returns `true` when the filter absorbed the observation; `false` when
    /// it was discarded (stale clock) or the filter had to reset.
    pub fn push(&mut self, pose: &Pose, t: Timestamp) -> bool {
        let Some(last_t) = self.last_t else {
            self.seed(pose, t);
            return true;
        };
        let dt = t.duration_since(&last_t);
        if dt <= 0.0 {
            return false; // stale observation, no state change
        }

        // Face toggle: the detector is now looking at an adjacent plate.
        let theta = self.model.state()[3];
        if let Some(steps) = angles::face_jump(pose.yaw, theta, self.cfg.armor_count) {
            self.apply_toggle(steps);
        }

        let aligned = angles::align(self.model.state()[3], pose.yaw);
        let z = nalgebra::Vector4::new(pose.x, pose.y, pose.z, aligned);
        let ok = self.model.predict(&OrbitProcess, dt) && self.model.update(&OrbitMeasure, &z);
        if !ok {
            warn!("orbit filter diverged, restarting");
            self.reset();
            return false;
        }

        // Radius stays physical no matter what the innovation suggested.
        let x = self.model.state_mut();
        x[8] = x[8].clamp(self.cfg.r_min, self.cfg.r_max);

        let x = self.model.state();
        self.v_std.push(x[4].hypot(x[5]));
        self.w_std.push(x[7]);
        self.updates += 1;
        self.last_t = Some(t);
        true
    }

    fn seed(&mut self, pose: &Pose, t: Timestamp) {
        self.model.reset();
        let r0 = self.cfg.initial_radius;
        let x = self.model.state_mut();
        x[0] = pose.x + r0 * pose.yaw.cos();
        x[1] = pose.y + r0 * pose.yaw.sin();
        x[2] = pose.z;
        x[3] = pose.yaw;
        x[8] = r0;
        self.radius = [r0; 2];
        self.height = [pose.z; 2];
        self.pair = 0;
        self.updates = 1;
        self.last_t = Some(t);
        debug!(x = pose.x, y = pose.y, "orbit seeded");
    }

    /// Swaps the face-pair memory and rotates the model heading onto the
    /// newly visible plate.
    fn apply_toggle(&mut self, steps: i32) {
        let span = angles::face_span(self.cfg.armor_count);
        let x = self.model.state_mut();
        let live_r = x[8].clamp(self.cfg.r_min, self.cfg.r_max);
        let live_z = x[2];
        self.radius[self.pair] = live_r;
        self.height[self.pair] = live_z;
        if steps.rem_euclid(2) == 1 {
            self.pair ^= 1;
        }
        x[8] = self.radius[self.pair];
        x[2] = self.height[self.pair];
        x[3] += f64::from(steps) * span;
        self.toggles += 1;
        debug!(steps, pair = self.pair, toggles = self.toggles, "face toggled");
    }

    /// Number of face toggles seen so far.
    #[must_use]
    pub fn toggle(&self) -> i32 {
        self.toggles
    }

    /// Which of the two face pairs the live filter states describe.
    #[must_use]
    pub fn active_pair(&self) -> usize {
        self.pair
    }

    /// Stored (radius, height) of a face pair.
    #[must_use]
    pub fn pair_geometry(&self, pair: usize) -> (f64, f64) {
        (self.radius[pair & 1], self.height[pair & 1])
    }

    /// Current spin-rate estimate (rad/s).
    #[must_use]
    pub fn omega(&self) -> f64 {
        self.model.state()[7]
    }

    /// Current orbit-radius estimate (m).
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.model.state()[8]
    }

    /// Total updates absorbed.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// True when the center-velocity and spin-rate spreads have settled.
    #[must_use]
    pub fn is_std_stable(&self) -> bool {
        self.v_std.is_full()
            && self.v_std.std() <= self.cfg.fire_std_v
            && self.w_std.std() <= self.cfg.fire_std_w
    }

    /// Predicted pose of the most shootable plate `delay` seconds past the
    /// last update.
    ///
    /// The model heading is advanced by `delay`, then the face whose plate
    /// is closest to face-on at that instant is selected; its stored
    /// geometry pair supplies radius and height.
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        let ahead = propagate_state(&OrbitProcess, self.model.state(), delay);
        let (cx, cy) = (ahead[0], ahead[1]);
        let bearing = cy.atan2(cx);
        let span = angles::face_span(self.cfg.armor_count);

        let mut best = (0u32, f64::INFINITY);
        for k in 0..self.cfg.armor_count {
            let face = ahead[3] + f64::from(k) * span;
            let off = angles::safe_sub(face, bearing).abs();
            if off < best.1 {
                best = (k, off);
            }
        }

        let k = best.0;
        let face = ahead[3] + f64::from(k) * span;
        let pair = (self.pair + k as usize) & 1;
        let (r, z) = if pair == self.pair {
            (ahead[8], ahead[2])
        } else {
            (self.radius[pair], self.height[pair])
        };
        Pose::new(
            cx - r * face.cos(),
            cy - r * face.sin(),
            z,
            angles::align(0.0, face),
        )
    }

    /// Predicted center of rotation `delay` seconds past the last update.
    ///
    /// The yaw field carries the (wrapped) model heading.
    #[must_use]
    pub fn center_at(&self, delay: f64) -> Pose {
        let ahead = propagate_state(&OrbitProcess, self.model.state(), delay);
        Pose::new(ahead[0], ahead[1], ahead[2], angles::align(0.0, ahead[3]))
    }

    /// Follow-armor fire permission for a candidate aim pose at time `now`.
    #[must_use]
    pub fn fire_armor(&self, pose: &Pose, now: Timestamp) -> bool {
        let Some(last_t) = self.last_t else { return false };
        pose.aim_offset().abs() <= self.cfg.fire_armor_angle
            && self.updates >= self.cfg.fire_update
            && now.duration_since(&last_t) <= self.cfg.fire_delay
            && self.is_std_stable()
    }

    /// Center-on fire permission: will any face cross within the center
    /// cone within `tof` seconds of `now`?
    #[must_use]
    pub fn fire_center(&self, now: Timestamp, tof: f64) -> bool {
        let Some(last_t) = self.last_t else { return false };
        let age = now.duration_since(&last_t);
        if self.updates < self.cfg.fire_update || age > self.cfg.fire_delay {
            return false;
        }
        self.face_crossing(age + tof, self.omega())
    }

    /// True when some face enters the center cone within `horizon` seconds,
    /// extrapolating the heading at `omega`. The center is treated as
    /// stationary over the horizon; its drift is negligible against the
    /// face sweep.
    pub(crate) fn face_crossing(&self, horizon: f64, omega: f64) -> bool {
        let x = self.model.state();
        let bearing = x[1].atan2(x[0]);
        let span = angles::face_span(self.cfg.armor_count);
        let travel = (omega * horizon).abs();
        let cone = self.cfg.fire_center_angle;
        (0..self.cfg.armor_count).any(|k| {
            let face = x[3] + f64::from(k) * span;
            let d = angles::safe_sub(bearing, face);
            if d.abs() <= cone {
                return true; // already inside the cone
            }
            // Arc the face still has to sweep, in the direction of rotation.
            let forward = if omega >= 0.0 {
                d.rem_euclid(std::f64::consts::TAU)
            } else {
                (-d).rem_euclid(std::f64::consts::TAU)
            };
            forward - cone <= travel
        })
    }

    /// Diagnostic lines.
    #[must_use]
    pub fn state_strings(&self) -> Vec<String> {
        let x = self.model.state();
        vec![
            format!(
                "orbit: c=({:.2}, {:.2}, {:.2}) theta={:.2} w={:.2} r={:.3}",
                x[0], x[1], x[2], x[3], x[7], x[8]
            ),
            format!(
                "pairs: r0={:.3} z0={:.2} r1={:.3} z1={:.2} active={} toggles={}",
                self.radius[0], self.height[0], self.radius[1], self.height[1],
                self.pair, self.toggles
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn t(frame: u32) -> Timestamp {
        Timestamp::new(200, 0).offset(frame as f64 * 0.02)
    }

    /// Plate orbiting (2, 0) at radius 0.2, spinning at `omega`.
    fn orbit_pose(theta: f64) -> Pose {
        Pose::new(
            2.0 - 0.2 * theta.cos(),
            0.0 - 0.2 * theta.sin(),
            0.1,
            angles::align(0.0, theta),
        )
    }

    #[test]
    fn test_recovers_center_and_radius() {
        let mut spin = SpinEstimator::default();
        let omega = PI;
        for f in 0..100 {
            let theta = omega * f as f64 * 0.02;
            assert!(spin.push(&orbit_pose(theta), t(f)));
        }
        let x = spin.model.state();
        assert_relative_eq!(x[0], 2.0, epsilon = 0.05);
        assert_relative_eq!(x[1], 0.0, epsilon = 0.05);
        assert_relative_eq!(spin.radius(), 0.2, epsilon = 0.05);
        assert_relative_eq!(spin.omega(), PI, epsilon = 0.3);
    }

    #[test]
    fn test_toggle_swaps_pair_geometry() {
        let mut spin = SpinEstimator::default();
        let omega = PI;
        for f in 0..100 {
            let theta = omega * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
        }
        let r_before = spin.radius();
        assert_eq!(spin.toggle(), 0);
        assert_eq!(spin.active_pair(), 0);

        // The next face becomes visible: same orbit, heading jumped by π/2.
        let theta = omega * 100.0 * 0.02 + FRAC_PI_2;
        spin.push(&orbit_pose(theta), t(100));

        assert_eq!(spin.toggle(), 1);
        assert_eq!(spin.active_pair(), 1);
        // The previous face's radius was parked in pair 0.
        let (r0, _z0) = spin.pair_geometry(0);
        assert_relative_eq!(r0, r_before, epsilon = 1e-9);

        // Post-jump updates keep converging on the new face.
        for f in 101..111 {
            let theta = omega * f as f64 * 0.02 + FRAC_PI_2;
            assert!(spin.push(&orbit_pose(theta), t(f)));
        }
        let x = spin.model.state();
        assert_relative_eq!(x[0], 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_radius_clamped() {
        let mut spin = SpinEstimator::default();
        for f in 0..50 {
            let theta = 2.0 * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
            let r = spin.radius();
            assert!(
                (spin.cfg.r_min..=spin.cfg.r_max).contains(&r),
                "radius {r} escaped its clamp"
            );
        }
    }

    #[test]
    fn test_stale_observation_is_noop() {
        let mut spin = SpinEstimator::default();
        spin.push(&orbit_pose(0.0), t(5));
        spin.push(&orbit_pose(0.1), t(6));
        let before = *spin.model.state();
        assert!(!spin.push(&orbit_pose(0.2), t(3)));
        assert_eq!(*spin.model.state(), before);
    }

    #[test]
    fn test_fire_armor_gates() {
        let mut spin = SpinEstimator::new(SpinConfig {
            fire_update: 30,
            ..SpinConfig::default()
        });
        // Slow spin, easily stable; the plate stays nearly face-on.
        for f in 0..80 {
            let theta = 0.1 * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
        }
        let aim = spin.pose_at(0.0);
        let now = t(79).offset(0.05);
        assert!(spin.fire_armor(&aim, now));
        // Stale model refuses.
        assert!(!spin.fire_armor(&aim, now.offset(2.0)));
    }

    #[test]
    fn test_pose_at_picks_face_on_plate() {
        let mut spin = SpinEstimator::default();
        let omega = PI;
        for f in 0..150 {
            let theta = omega * f as f64 * 0.02;
            spin.push(&orbit_pose(theta), t(f));
        }
        // Whatever the current heading, the nominated plate must be within
        // half a face span of dead-on.
        let aim = spin.pose_at(0.1);
        assert!(aim.aim_offset().abs() <= angles::face_span(4) / 2.0 + 0.2);
        // And it must sit on the orbit circle.
        let center = spin.center_at(0.1);
        let d = ((aim.x - center.x).powi(2) + (aim.y - center.y).powi(2)).sqrt();
        assert_relative_eq!(d, 0.2, epsilon = 0.07);
    }
}
