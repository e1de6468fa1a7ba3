//! Energy-rune estimator.
//!
//! The rune is a planar fan of five blades rotating about a fixed, known
//! center. Exactly one blade is lit at a time; the detector reports the lit
//! blade's tip pose. Two speed laws exist:
//!
//! - **small rune**: constant angular speed (π/3 rad/s by the rules, still
//!   estimated for robustness);
//! - **big rune**: `dφ/dt = a·sin(wt + p) + (B_BASE − a)` with the
//!   amplitude `a` and pulsation `w` confined to known windows.
//!
//! The blade tip relates to the rune center `(x, y, z)`, plane orientation
//! `θ` and blade angle `φ` by
//!
//! ```text
//! bx = x + R·cos φ·sin θ
//! by = y − R·cos φ·cos θ
//! bz = z + R·sin φ
//! ```
//!
//! When the lit blade jumps to the next slot the estimator re-anchors its
//! blade angle and opens a fire window a configurable delay later, the
//! moment the rune is most predictable.

use autoaim_core::{angles, Pose, RuneObservation, Timestamp};
use autoaim_filter::ekf::{measure_state, propagate_state};
use autoaim_filter::{
    ExtendedKalman, LinearKalman, LinearObservation, LinearTransition, MeasurementModel,
    ProcessModel, Real, SlideAvg,
};
use nalgebra::{SMatrix, SVector, Vector1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lower clamp of the big-rune speed amplitude.
pub const A_MIN: f64 = 0.780;
/// Upper clamp of the big-rune speed amplitude.
pub const A_MAX: f64 = 1.045;
/// Lower clamp of the big-rune pulsation.
pub const W_MIN: f64 = 1.884;
/// Upper clamp of the big-rune pulsation.
pub const W_MAX: f64 = 2.000;
/// The amplitude and the constant term sum to this by the rules.
pub const B_BASE: f64 = 2.090;
/// Small-rune angular speed mandated by the rules (rad/s).
pub const SMALL_RUNE_SPD: f64 = std::f64::consts::PI / 3.0;
/// Blade radius: center to lit-armor center (m).
pub const BLADE_RADIUS: f64 = 0.69852;

/// Half the 2π/5 blade pitch: an aligned jump beyond this means the lit
/// blade moved to another slot.
const BLADE_JUMP_GATE: f64 = std::f64::consts::PI / 5.0;

/// Constant-speed blade advance.
struct SmallRuneProcess;

impl ProcessModel<6> for SmallRuneProcess {
    fn apply<T: Real>(&self, x0: &[T; 6], x1: &mut [T; 6], dt: f64) {
        x1[0] = x0[0];
        x1[1] = x0[1];
        x1[2] = x0[2];
        x1[3] = x0[3];
        x1[4] = x0[4] + x0[5] * dt;
        x1[5] = x0[5];
    }
}

/// Sinusoidal speed law, integrated with the midpoint speed over the step.
struct BigRuneProcess {
    sign: f64,
}

impl ProcessModel<8> for BigRuneProcess {
    fn apply<T: Real>(&self, x0: &[T; 8], x1: &mut [T; 8], dt: f64) {
        let mid_phase = x0[5] + x0[7] * (0.5 * dt);
        let speed = -(x0[6] - B_BASE) + mid_phase.sin() * x0[6];
        x1[0] = x0[0];
        x1[1] = x0[1];
        x1[2] = x0[2];
        x1[3] = x0[3];
        x1[4] = x0[4] + speed * (self.sign * dt);
        x1[5] = x0[5] + x0[7] * dt;
        x1[6] = x0[6];
        x1[7] = x0[7];
    }
}

/// Blade-tip geometry for the 6-state model.
struct SmallRuneMeasure;

impl MeasurementModel<6, 5> for SmallRuneMeasure {
    fn apply<T: Real>(&self, x: &[T; 6], y: &mut [T; 5]) {
        y[0] = x[0] + x[4].cos() * x[3].sin() * BLADE_RADIUS;
        y[1] = x[1] - x[4].cos() * x[3].cos() * BLADE_RADIUS;
        y[2] = x[2] + x[4].sin() * BLADE_RADIUS;
        y[3] = x[3];
        y[4] = x[4];
    }
}

/// Blade-tip geometry for the 8-state model.
struct BigRuneMeasure;

impl MeasurementModel<8, 5> for BigRuneMeasure {
    fn apply<T: Real>(&self, x: &[T; 8], y: &mut [T; 5]) {
        y[0] = x[0] + x[4].cos() * x[3].sin() * BLADE_RADIUS;
        y[1] = x[1] - x[4].cos() * x[3].cos() * BLADE_RADIUS;
        y[2] = x[2] + x[4].sin() * BLADE_RADIUS;
        y[3] = x[3];
        y[4] = x[4];
    }
}

/// Constant-rate tracker over the raw blade angle.
struct SpdTransition;

impl LinearTransition<2> for SpdTransition {
    fn matrix(&self, dt: f64) -> SMatrix<f64, 2, 2> {
        let mut a = SMatrix::identity();
        a[(0, 1)] = dt;
        a
    }
}

struct SpdObservation;

impl LinearObservation<2, 1> for SpdObservation {
    fn matrix(&self) -> SMatrix<f64, 1, 2> {
        SMatrix::<f64, 1, 2>::new(1.0, 0.0)
    }
}

/// Which speed law the rune follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuneKind {
    /// Constant angular speed.
    Small,
    /// Sinusoidal speed law.
    Big,
}

/// Tuning for [`RuneEstimator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneConfig {
    /// Minimum measured speed before the big rune may fire (rad/s).
    pub big_fire_speed: f64,
    /// Fire window opens this long after a blade transition (s).
    pub fire_after_trans: f64,
    /// Fire window length (s).
    pub fire_keep: f64,
    /// Lockout between two fire flags (s).
    pub fire_interval: f64,
    /// Model considered stale after this long without observations (s).
    pub stale_after: f64,
    /// Window length of the center/orientation/speed smoothers.
    pub smooth_window: usize,
    /// Process-noise diagonal of the small model.
    pub small_q: [f64; 6],
    /// Observation-noise diagonal of the small model.
    pub small_r: [f64; 5],
    /// Process-noise diagonal of the big model.
    pub big_q: [f64; 8],
    /// Observation-noise diagonal of the big model.
    pub big_r: [f64; 5],
    /// Process-noise diagonal of the speed tracker.
    pub spd_q: [f64; 2],
    /// Observation-noise diagonal of the speed tracker.
    pub spd_r: [f64; 1],
}

impl Default for RuneConfig {
    fn default() -> Self {
        Self {
            big_fire_speed: 1.0,
            fire_after_trans: 0.1,
            fire_keep: 0.1,
            fire_interval: 0.5,
            stale_after: 1.0,
            smooth_window: 100,
            small_q: [1e-5, 1e-5, 1e-5, 1e-5, 1e-3, 1e-3],
            small_r: [1e-4, 1e-4, 1e-4, 1e-4, 1e-4],
            big_q: [1e-5, 1e-5, 1e-5, 1e-5, 1e-3, 1e-3, 1e-4, 1e-4],
            big_r: [1e-4, 1e-4, 1e-4, 1e-4, 1e-4],
            spd_q: [1e-4, 1e-2],
            spd_r: [1e-4],
        }
    }
}

impl RuneConfig {
    /// Validates a (possibly file-loaded) tuning before construction.
    pub fn validate(&self) -> autoaim_core::CoreResult<()> {
        use autoaim_core::CoreError;
        for (name, v) in [
            ("fire_after_trans", self.fire_after_trans),
            ("fire_keep", self.fire_keep),
            ("fire_interval", self.fire_interval),
            ("stale_after", self.stale_after),
        ] {
            if v < 0.0 {
                return Err(CoreError::invalid_parameter(name, v, ">= 0"));
            }
        }
        crate::queue::validate_diag("small_q", &self.small_q)?;
        crate::queue::validate_diag("small_r", &self.small_r)?;
        crate::queue::validate_diag("big_q", &self.big_q)?;
        crate::queue::validate_diag("big_r", &self.big_r)?;
        crate::queue::validate_diag("spd_q", &self.spd_q)?;
        crate::queue::validate_diag("spd_r", &self.spd_r)
    }
}

/// Rune state estimator with a transition-synchronised fire window.
pub struct RuneEstimator {
    kind: RuneKind,
    cfg: RuneConfig,
    small: ExtendedKalman<6, 5>,
    big: ExtendedKalman<8, 5>,
    spd: LinearKalman<2, 1>,
    /// Rotation direction: −1, 0 (unknown yet) or +1.
    sign: f64,
    updates: u64,
    transitions: u32,
    last_t: Option<Timestamp>,
    last_trans_t: Option<Timestamp>,
    last_fire_t: Option<Timestamp>,
    last_blade: f64,
    center_x: SlideAvg,
    center_y: SlideAvg,
    center_z: SlideAvg,
    orientation: SlideAvg,
    speed_avg: SlideAvg,
}

impl RuneEstimator {
    /// Creates an estimator for the given rune kind.
    #[must_use]
    pub fn new(kind: RuneKind, cfg: RuneConfig) -> Self {
        let mut small = ExtendedKalman::new();
        small.set_process_diag(&cfg.small_q);
        small.set_measurement_diag(&cfg.small_r);
        let mut big = ExtendedKalman::new();
        big.set_process_diag(&cfg.big_q);
        big.set_measurement_diag(&cfg.big_r);
        let mut spd = LinearKalman::new();
        spd.set_process_diag(&cfg.spd_q);
        spd.set_measurement_diag(&cfg.spd_r);
        let w = cfg.smooth_window;
        Self {
            kind,
            cfg,
            small,
            big,
            spd,
            sign: 0.0,
            updates: 0,
            transitions: 0,
            last_t: None,
            last_trans_t: None,
            last_fire_t: None,
            last_blade: 0.0,
            center_x: SlideAvg::new(w),
            center_y: SlideAvg::new(w),
            center_z: SlideAvg::new(w),
            orientation: SlideAvg::new(w),
            speed_avg: SlideAvg::new(w),
        }
    }

    /// Drops all learned state; the next push reseeds.
    pub fn reset(&mut self) {
        self.small.reset();
        self.big.reset();
        self.spd.reset();
        self.sign = 0.0;
        self.updates = 0;
        self.transitions = 0;
        self.last_t = None;
        self.last_trans_t = None;
        self.last_fire_t = None;
        self.last_blade = 0.0;
        self.center_x.clear();
        self.center_y.clear();
        self.center_z.clear();
        self.orientation.clear();
        self.speed_avg.clear();
    }

    /// Rune center inferred from one observation by inverting the blade
    /// geometry.
    fn infer_center(obs: &RuneObservation) -> (f64, f64, f64) {
        let cos_b = obs.blade_angle.cos();
        (
            obs.x - BLADE_RADIUS * cos_b * obs.rune_yaw.sin(),
            obs.y + BLADE_RADIUS * cos_b * obs.rune_yaw.cos(),
            obs.z - BLADE_RADIUS * obs.blade_angle.sin(),
        )
    }

    fn seed(&mut self, obs: &RuneObservation, t: Timestamp) {
        let (cx, cy, cz) = Self::infer_center(obs);
        match self.kind {
            RuneKind::Small => {
                self.small.reset();
                let x = self.small.state_mut();
                x[0] = cx;
                x[1] = cy;
                x[2] = cz;
                x[3] = obs.rune_yaw;
                x[4] = obs.blade_angle;
                // Speed starts unknown; the blade stream teaches it fast.
            }
            RuneKind::Big => {
                self.big.reset();
                let x = self.big.state_mut();
                x[0] = cx;
                x[1] = cy;
                x[2] = cz;
                x[3] = obs.rune_yaw;
                x[4] = obs.blade_angle;
                x[6] = 0.5 * (A_MIN + A_MAX);
                x[7] = 0.5 * (W_MIN + W_MAX);
            }
        }
        self.spd.reset();
        let s = self.spd.state_mut();
        s[0] = obs.blade_angle;
        self.last_blade = obs.blade_angle;
        self.last_t = Some(t);
        self.updates = 1;
        debug!(cx, cy, cz, "rune seeded");
    }

    /// Consumes one blade observation.
    ///
    /// Returns `true` when the filters absorbed it; `false` on a stale
    /// timestamp or a filter reset.
    pub fn push(&mut self, obs: &RuneObservation, t: Timestamp) -> bool {
        let Some(last_t) = self.last_t else {
            self.seed(obs, t);
            return true;
        };
        let dt = t.duration_since(&last_t);
        if dt <= 0.0 {
            return false;
        }

        // Lit-blade handover: re-anchor the blade angle, leave the learned
        // speed and geometry untouched.
        let jump = angles::safe_sub(obs.blade_angle, self.last_blade);
        if jump.abs() > BLADE_JUMP_GATE {
            self.transitions += 1;
            self.last_trans_t = Some(t);
            let blade_state = match self.kind {
                RuneKind::Small => &mut self.small.state_mut()[4],
                RuneKind::Big => &mut self.big.state_mut()[4],
            };
            *blade_state = angles::align(*blade_state, obs.blade_angle);
            let s = self.spd.state_mut();
            s[0] = angles::align(s[0], obs.blade_angle);
            debug!(jump, transitions = self.transitions, "blade transition");
        }

        // Raw speed tracker over the blade angle.
        self.spd.predict(&SpdTransition, dt);
        let unwrapped = angles::align(self.spd.state()[0], obs.blade_angle);
        self.spd.update(&SpdObservation, &Vector1::new(unwrapped));
        let measured_speed = self.spd.state()[1];
        if measured_speed.abs() > 0.3 {
            self.sign = measured_speed.signum();
        }

        // Main model.
        let ok = match self.kind {
            RuneKind::Small => {
                let x = self.small.state();
                let z = SVector::<f64, 5>::new(
                    obs.x,
                    obs.y,
                    obs.z,
                    angles::align(x[3], obs.rune_yaw),
                    angles::align(x[4], obs.blade_angle),
                );
                self.small.predict(&SmallRuneProcess, dt) && self.small.update(&SmallRuneMeasure, &z)
            }
            RuneKind::Big => {
                let x = self.big.state();
                let z = SVector::<f64, 5>::new(
                    obs.x,
                    obs.y,
                    obs.z,
                    angles::align(x[3], obs.rune_yaw),
                    angles::align(x[4], obs.blade_angle),
                );
                let process = BigRuneProcess { sign: self.sign };
                let ok = self.big.predict(&process, dt) && self.big.update(&BigRuneMeasure, &z);
                if ok {
                    // The speed-law parameters never leave their rule-book
                    // windows, whatever the innovation said.
                    let x = self.big.state_mut();
                    x[6] = x[6].clamp(A_MIN, A_MAX);
                    x[7] = x[7].clamp(W_MIN, W_MAX);
                }
                ok
            }
        };
        if !ok {
            warn!("rune filter diverged, restarting");
            self.reset();
            return false;
        }

        // Slow smoothers over the inferred geometry.
        let (cx, cy, cz) = Self::infer_center(obs);
        self.center_x.push(cx);
        self.center_y.push(cy);
        self.center_z.push(cz);
        self.orientation.push(angles::align(self.orientation.mean(), obs.rune_yaw));
        self.speed_avg.push(measured_speed);

        self.updates += 1;
        self.last_t = Some(t);
        self.last_blade = obs.blade_angle;
        true
    }

    /// Predicted lit-blade tip pose `delay` seconds past the last update.
    ///
    /// The yaw field carries the rune plane orientation.
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        match self.kind {
            RuneKind::Small => {
                let ahead = propagate_state(&SmallRuneProcess, self.small.state(), delay);
                let z: SVector<f64, 5> = measure_state(&SmallRuneMeasure, &ahead);
                Pose::new(z[0], z[1], z[2], angles::align(0.0, z[3]))
            }
            RuneKind::Big => {
                let process = BigRuneProcess { sign: self.sign };
                let ahead = propagate_state(&process, self.big.state(), delay);
                let z: SVector<f64, 5> = measure_state(&BigRuneMeasure, &ahead);
                Pose::new(z[0], z[1], z[2], angles::align(0.0, z[3]))
            }
        }
    }

    /// Smoothed rune center; the fallback aim point once the model goes
    /// stale.
    #[must_use]
    pub fn center(&self) -> Pose {
        Pose::new(
            self.center_x.mean(),
            self.center_y.mean(),
            self.center_z.mean(),
            angles::align(0.0, self.orientation.mean()),
        )
    }

    /// Measured blade angular speed (rad/s, signed).
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.spd.state()[1]
    }

    /// Rotation direction: −1, 0 (not yet established) or +1.
    #[must_use]
    pub fn direction(&self) -> f64 {
        self.sign
    }

    /// Blade transitions seen so far.
    #[must_use]
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Total updates absorbed.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// True when no observation arrived within the staleness horizon;
    /// callers should fall back to aiming at [`center`](Self::center).
    #[must_use]
    pub fn is_stale(&self, now: Timestamp) -> bool {
        match self.last_t {
            Some(t) => now.duration_since(&t) > self.cfg.stale_after,
            None => true,
        }
    }

    /// Fire permission at `now`.
    ///
    /// Permitted inside the window `[fire_after_trans, fire_after_trans +
    /// fire_keep]` after the last blade transition, at most once per
    /// `fire_interval`, never on a stale model, and (big rune) only above
    /// the speed floor. A granted flag starts the lockout.
    pub fn fire_flag(&mut self, now: Timestamp) -> bool {
        if self.is_stale(now) {
            return false;
        }
        let Some(trans_t) = self.last_trans_t else {
            return false;
        };
        let since = now.duration_since(&trans_t);
        if since < self.cfg.fire_after_trans || since > self.cfg.fire_after_trans + self.cfg.fire_keep
        {
            return false;
        }
        if self.kind == RuneKind::Big && self.speed().abs() < self.cfg.big_fire_speed {
            return false;
        }
        if let Some(fire_t) = self.last_fire_t {
            if now.duration_since(&fire_t) < self.cfg.fire_interval {
                return false;
            }
        }
        self.last_fire_t = Some(now);
        true
    }

    /// Diagnostic lines.
    #[must_use]
    pub fn state_strings(&self) -> Vec<String> {
        let (blade, speed_state) = match self.kind {
            RuneKind::Small => (self.small.state()[4], self.small.state()[5]),
            RuneKind::Big => (self.big.state()[4], f64::NAN),
        };
        let mut lines = vec![
            format!(
                "rune: center=({:.2}, {:.2}, {:.2}) blade={:.2} spd={:.2} sign={:+.0}",
                self.center_x.mean(),
                self.center_y.mean(),
                self.center_z.mean(),
                blade,
                self.speed(),
                self.sign,
            ),
            format!(
                "rune: updates={} transitions={} model_spd={:.2}",
                self.updates, self.transitions, speed_state
            ),
        ];
        if self.kind == RuneKind::Big {
            let x = self.big.state();
            lines.push(format!(
                "rune law: a={:.3} w={:.3} p={:.2}",
                x[6], x[7], x[5]
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn t(frame: u32) -> Timestamp {
        Timestamp::new(400, 0).offset(frame as f64 * 0.02)
    }

    /// Blade tip for a rune centered at (0, 5, 1.5) facing the observer.
    fn tip(blade: f64) -> RuneObservation {
        let theta = FRAC_PI_2;
        RuneObservation::new(
            0.0 + BLADE_RADIUS * blade.cos() * theta.sin(),
            5.0 - BLADE_RADIUS * blade.cos() * theta.cos(),
            1.5 + BLADE_RADIUS * blade.sin(),
            theta,
            angles::align(0.0, blade),
        )
    }

    #[test]
    fn test_small_rune_learns_speed() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        for f in 0..=50 {
            let blade = SMALL_RUNE_SPD * f as f64 * 0.02;
            assert!(rune.push(&tip(blade), t(f)));
        }
        assert_relative_eq!(rune.speed(), SMALL_RUNE_SPD, epsilon = 0.05);
        assert_relative_eq!(rune.small.state()[5], SMALL_RUNE_SPD, epsilon = 0.1);
        assert_relative_eq!(rune.direction(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_rune_predicts_tip() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        for f in 0..=50 {
            let blade = SMALL_RUNE_SPD * f as f64 * 0.02;
            rune.push(&tip(blade), t(f));
        }
        // Predict 0.2 s past the last update and compare with the truth.
        let truth = tip(SMALL_RUNE_SPD * (50.0 * 0.02 + 0.2));
        let predicted = rune.pose_at(0.2);
        assert_relative_eq!(predicted.x, truth.x, epsilon = 0.03);
        assert_relative_eq!(predicted.y, truth.y, epsilon = 0.03);
        assert_relative_eq!(predicted.z, truth.z, epsilon = 0.03);
    }

    #[test]
    fn test_center_recovered() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        for f in 0..=100 {
            let blade = SMALL_RUNE_SPD * f as f64 * 0.02;
            rune.push(&tip(blade), t(f));
        }
        let c = rune.center();
        assert_relative_eq!(c.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.y, 5.0, epsilon = 1e-6);
        assert_relative_eq!(c.z, 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_blade_transition_detected() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        let mut blade = 0.0;
        for f in 0..50 {
            blade = SMALL_RUNE_SPD * f as f64 * 0.02;
            rune.push(&tip(blade), t(f));
        }
        assert_eq!(rune.transitions(), 0);

        // The next blade lights up: 2π/5 ahead.
        let jumped = blade + 2.0 * std::f64::consts::PI / 5.0;
        rune.push(&tip(jumped), t(50));
        assert_eq!(rune.transitions(), 1);

        // Tracking continues smoothly on the new blade.
        for f in 51..60 {
            let b = jumped + SMALL_RUNE_SPD * (f - 50) as f64 * 0.02;
            assert!(rune.push(&tip(b), t(f)));
        }
        assert_relative_eq!(rune.speed(), SMALL_RUNE_SPD, epsilon = 0.3);
    }

    #[test]
    fn test_fire_window_timing() {
        let cfg = RuneConfig {
            fire_after_trans: 0.1,
            fire_keep: 0.2,
            fire_interval: 0.25,
            ..RuneConfig::default()
        };
        let mut rune = RuneEstimator::new(RuneKind::Small, cfg);
        for f in 0..50 {
            let blade = SMALL_RUNE_SPD * f as f64 * 0.02;
            rune.push(&tip(blade), t(f));
        }
        // Transition at frame 50.
        let base = SMALL_RUNE_SPD * 49.0 * 0.02 + 2.0 * std::f64::consts::PI / 5.0;
        rune.push(&tip(base), t(50));
        let trans_t = t(50);

        // Too early.
        assert!(!rune.fire_flag(trans_t.offset(0.05)));
        // Inside the window.
        assert!(rune.fire_flag(trans_t.offset(0.15)));
        // Lockout right after a granted flag.
        assert!(!rune.fire_flag(trans_t.offset(0.2)));
        // Window closed.
        assert!(!rune.fire_flag(trans_t.offset(0.5)));
    }

    #[test]
    fn test_fire_flag_stale_model() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        for f in 0..10 {
            rune.push(&tip(f as f64 * 0.1), t(f));
        }
        // Force a transition record, then let the model go stale.
        rune.push(&tip(2.0), t(10));
        assert!(rune.transitions() > 0);
        assert!(!rune.fire_flag(t(10).offset(5.0)));
    }

    #[test]
    fn test_big_rune_parameters_stay_clamped() {
        let mut rune = RuneEstimator::new(RuneKind::Big, RuneConfig::default());
        // True law: a = 0.9, w = 1.9, p0 = 0, positive direction.
        let (a, w) = (0.9, 1.9);
        let phi = |time: f64| (a / w) * (1.0 - (w * time).cos()) + (B_BASE - a) * time;
        for f in 0..=200 {
            let time = f as f64 * 0.02;
            rune.push(&tip(phi(time)), t(f));
            let x = rune.big.state();
            assert!((A_MIN..=A_MAX).contains(&x[6]), "a escaped: {}", x[6]);
            assert!((W_MIN..=W_MAX).contains(&x[7]), "w escaped: {}", x[7]);
        }
        assert_relative_eq!(rune.direction(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_big_rune_short_horizon_prediction() {
        let mut rune = RuneEstimator::new(RuneKind::Big, RuneConfig::default());
        let (a, w) = (0.9, 1.9);
        let phi = |time: f64| (a / w) * (1.0 - (w * time).cos()) + (B_BASE - a) * time;
        for f in 0..=200 {
            rune.push(&tip(phi(f as f64 * 0.02)), t(f));
        }
        let truth = tip(phi(200.0 * 0.02 + 0.1));
        let predicted = rune.pose_at(0.1);
        // The tip moves at ≤ 1.5 m/s; a tuned short-horizon prediction
        // lands within a blade-armor width.
        assert_relative_eq!(predicted.x, truth.x, epsilon = 0.1);
        assert_relative_eq!(predicted.z, truth.z, epsilon = 0.1);
    }

    #[test]
    fn test_stale_observation_is_noop() {
        let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
        rune.push(&tip(0.0), t(5));
        rune.push(&tip(0.02), t(6));
        let before = rune.update_count();
        assert!(!rune.push(&tip(0.05), t(2)));
        assert_eq!(rune.update_count(), before);
    }
}
