//! Accelerating-target tracking queue.
//!
//! Eleven-state extended model per slot:
//! `(x, y, z, θ, vx, vy, vz, ω, ax, ay, αθ)` observed through `(x, y, z, θ)`.
//! Planar position and heading carry full second-order kinematics; height is
//! constant-velocity. This is the workhorse queue for ground robots whose
//! plates strafe and swing.

use autoaim_core::{angles, CoreResult, Pose, Timestamp};
use autoaim_filter::ekf::{measure_state, propagate_state};
use autoaim_filter::{ExtendedKalman, MeasurementModel, ProcessModel, Real, SlideStd};
use nalgebra::{SVector, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{associate, expire, select_face_on, Association, SlotMeta, TrackSlot};

/// Second-order planar kinematics with constant-velocity height.
pub(crate) struct AccelProcess;

impl ProcessModel<11> for AccelProcess {
    fn apply<T: Real>(&self, x0: &[T; 11], x1: &mut [T; 11], dt: f64) {
        let half_dt2 = 0.5 * dt * dt;
        x1[0] = x0[0] + x0[4] * dt + x0[8] * half_dt2;
        x1[1] = x0[1] + x0[5] * dt + x0[9] * half_dt2;
        x1[2] = x0[2] + x0[6] * dt;
        x1[3] = x0[3] + x0[7] * dt + x0[10] * half_dt2;
        x1[4] = x0[4] + x0[8] * dt;
        x1[5] = x0[5] + x0[9] * dt;
        x1[6] = x0[6];
        x1[7] = x0[7] + x0[10] * dt;
        x1[8] = x0[8];
        x1[9] = x0[9];
        x1[10] = x0[10];
    }
}

/// Direct observation of position and plate yaw.
pub(crate) struct PoseMeasure;

impl MeasurementModel<11, 4> for PoseMeasure {
    fn apply<T: Real>(&self, x: &[T; 11], y: &mut [T; 4]) {
        y[0] = x[0];
        y[1] = x[1];
        y[2] = x[2];
        y[3] = x[3];
    }
}

/// Tuning for [`AccelTrackQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelQueueConfig {
    /// Number of slots held by the queue.
    pub capacity: usize,
    /// Updates required before a slot becomes available for aiming.
    pub min_count: u32,
    /// Association gate: maximum movement (m) between frames for the same target.
    pub max_distance: f64,
    /// Same-plate yaw gate (rad) applied on top of the distance gate.
    pub max_yaw_diff: f64,
    /// Slot cleared when silent for longer than this (s).
    pub max_delay: f64,
    /// Minimum yaw difference between targets to count a toggle (rad).
    pub toggle_angle_offset: f64,
    /// Fire gate on velocity spread (m/s).
    pub fire_std_v: f64,
    /// Fire gate on angular-velocity spread (rad/s).
    pub fire_std_w: f64,
    /// Fire gate on acceleration spread (m/s²).
    pub fire_std_a: f64,
    /// Fire gate on aim angle (rad).
    pub fire_angle: f64,
    /// Sliding window length for the std gates.
    pub std_window: usize,
    /// Process-noise diagonal.
    pub q_diag: [f64; 11],
    /// Observation-noise diagonal.
    pub r_diag: [f64; 4],
}

impl Default for AccelQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            min_count: 10,
            max_distance: 0.1,
            max_yaw_diff: 0.5,
            max_delay: 0.3,
            toggle_angle_offset: 0.17,
            fire_std_v: 0.1,
            fire_std_w: 0.1,
            fire_std_a: 0.1,
            fire_angle: 0.5,
            std_window: 5,
            q_diag: [
                1e-4, 1e-4, 1e-4, 1e-4, // position, heading
                1e-2, 1e-2, 1e-2, 1e-2, // their rates
                1e-1, 1e-1, 1e-1, // accelerations
            ],
            r_diag: [1e-4, 1e-4, 1e-4, 1e-4],
        }
    }
}

impl AccelQueueConfig {
    /// Validates a (possibly file-loaded) tuning before construction.
    pub fn validate(&self) -> CoreResult<()> {
        super::validate_common(
            self.capacity,
            self.min_count,
            self.max_distance,
            self.max_delay,
        )?;
        super::validate_diag("q_diag", &self.q_diag)?;
        super::validate_diag("r_diag", &self.r_diag)
    }
}

struct AccelSlot {
    meta: SlotMeta,
    model: ExtendedKalman<11, 4>,
    v_std: SlideStd,
    w_std: SlideStd,
    a_std: SlideStd,
}

impl AccelSlot {
    fn new(cfg: &AccelQueueConfig) -> Self {
        let mut model = ExtendedKalman::new();
        model.set_process_diag(&cfg.q_diag);
        model.set_measurement_diag(&cfg.r_diag);
        Self {
            meta: SlotMeta::default(),
            model,
            v_std: SlideStd::new(cfg.std_window),
            w_std: SlideStd::new(cfg.std_window),
            a_std: SlideStd::new(cfg.std_window),
        }
    }

    fn seed(&mut self, pose: &Pose) {
        self.model.reset();
        let x = self.model.state_mut();
        x[0] = pose.x;
        x[1] = pose.y;
        x[2] = pose.z;
        x[3] = pose.yaw;
    }

    fn feed_windows(&mut self) {
        let x = self.model.state();
        self.v_std.push(x[4].hypot(x[5]));
        self.w_std.push(x[7]);
        self.a_std.push(x[8].hypot(x[9]));
    }
}

impl TrackSlot for AccelSlot {
    fn meta(&self) -> &SlotMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut SlotMeta {
        &mut self.meta
    }
    fn clear(&mut self) {
        self.meta.clear();
        self.model.reset();
        self.v_std.clear();
        self.w_std.clear();
        self.a_std.clear();
    }
}

/// Multi-target queue over the 11-state accelerating model.
pub struct AccelTrackQueue {
    cfg: AccelQueueConfig,
    slots: Vec<AccelSlot>,
    frame_t: Option<Timestamp>,
    last_index: Option<usize>,
    toggle: i32,
}

impl Default for AccelTrackQueue {
    fn default() -> Self {
        Self::new(AccelQueueConfig::default())
    }
}

impl AccelTrackQueue {
    /// Creates a queue; all slots are allocated here and reused afterwards.
    #[must_use]
    pub fn new(cfg: AccelQueueConfig) -> Self {
        let slots = (0..cfg.capacity.max(1)).map(|_| AccelSlot::new(&cfg)).collect();
        Self {
            cfg,
            slots,
            frame_t: None,
            last_index: None,
            toggle: 0,
        }
    }

    /// Re-tunes the process noise of every slot.
    pub fn set_process_diag(&mut self, diag: &[f64; 11]) {
        self.cfg.q_diag = *diag;
        for slot in &mut self.slots {
            slot.model.set_process_diag(diag);
        }
    }

    /// Re-tunes the observation noise of every slot.
    pub fn set_measurement_diag(&mut self, diag: &[f64; 4]) {
        self.cfg.r_diag = *diag;
        for slot in &mut self.slots {
            slot.model.set_measurement_diag(diag);
        }
    }

    /// Associates one observation to a slot and advances its filter.
    ///
    /// Call once per detected plate per frame, in non-decreasing timestamp
    /// order; then call [`update`](Self::update) once for the frame.
    pub fn push(&mut self, pose: Pose, t: Timestamp) {
        match associate(&self.slots, &pose, t, self.cfg.max_distance, Some(self.cfg.max_yaw_diff)) {
            Association::Matched(i) => {
                let dt = t.duration_since(&self.slots[i].meta.last_t);
                let slot = &mut self.slots[i];
                let aligned = angles::align(slot.model.state()[3], pose.yaw);
                let z = Vector4::new(pose.x, pose.y, pose.z, aligned);
                let ok = slot.model.predict(&AccelProcess, dt) && slot.model.update(&PoseMeasure, &z);
                if !ok {
                    debug!(slot = i, "model diverged, recycling slot");
                    slot.clear();
                    return;
                }
                slot.feed_windows();
                slot.meta.refresh(pose, t, self.cfg.min_count);
                self.bump_frame(t);
            }
            Association::Fresh(i) => {
                let slot = &mut self.slots[i];
                slot.clear();
                slot.seed(&pose);
                slot.meta.refresh(pose, t, self.cfg.min_count);
                debug!(slot = i, x = pose.x, y = pose.y, "seeded new target");
                self.bump_frame(t);
            }
            Association::Stale | Association::Dropped => {}
        }
    }

    fn bump_frame(&mut self, t: Timestamp) {
        self.frame_t = Some(match self.frame_t {
            Some(f) if f > t => f,
            _ => t,
        });
    }

    /// Per-frame housekeeping: ages out silent slots, re-selects the current
    /// target and maintains the toggle counter. Call once per frame with the
    /// frame time, after all pushes, including frames with no detections, so
    /// abandoned slots still expire.
    pub fn update(&mut self, now: Timestamp) {
        expire(&mut self.slots, self.frame_t, now, self.cfg.max_delay);

        let next = select_face_on(&self.slots);
        if let (Some(prev), Some(sel)) = (self.last_index, next) {
            if prev != sel {
                let prev_yaw = self.slots[prev].meta.last_pose.yaw;
                let sel_yaw = self.slots[sel].meta.last_pose.yaw;
                if angles::safe_sub(sel_yaw, prev_yaw).abs() > self.cfg.toggle_angle_offset {
                    self.toggle += 1;
                    debug!(from = prev, to = sel, toggle = self.toggle, "target toggled");
                }
            }
        }
        self.last_index = next;
    }

    /// Number of toggles between distinct plates observed so far.
    #[must_use]
    pub fn toggle(&self) -> i32 {
        self.toggle
    }

    /// Index of the currently selected slot, if any.
    #[must_use]
    pub fn selected(&self) -> Option<usize> {
        self.last_index
    }

    /// Timestamp of the selected slot's last refresh.
    #[must_use]
    pub fn last_time(&self) -> Option<Timestamp> {
        self.last_index.map(|i| self.slots[i].meta.last_t)
    }

    /// Last raw observation of the selected slot.
    #[must_use]
    pub fn pose(&self) -> Pose {
        self.last_index
            .map(|i| self.slots[i].meta.last_pose)
            .unwrap_or(Pose::ZERO)
    }

    /// Model-predicted pose of the selected target `delay` seconds past its
    /// last update.
    ///
    /// Before the slot is available the raw observation is returned (zero
    /// pose if nothing exists); check [`is_fire_valid`](Self::is_fire_valid)
    /// before trusting the result.
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        let Some(i) = self.last_index else { return Pose::ZERO };
        let slot = &self.slots[i];
        if !slot.meta.available {
            return if slot.meta.exists { slot.meta.last_pose } else { Pose::ZERO };
        }
        let ahead = propagate_state(&AccelProcess, slot.model.state(), delay);
        let z: SVector<f64, 4> = measure_state(&PoseMeasure, &ahead);
        Pose::new(z[0], z[1], z[2], angles::align(0.0, z[3]))
    }

    /// Planar speed estimate of the selected target.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.last_index
            .map(|i| {
                let x = self.slots[i].model.state();
                x[4].hypot(x[5])
            })
            .unwrap_or(0.0)
    }

    /// Heading rate estimate of the selected target.
    #[must_use]
    pub fn omega(&self) -> f64 {
        self.last_index
            .map(|i| self.slots[i].model.state()[7])
            .unwrap_or(0.0)
    }

    /// True when the motion spreads have settled under their fire gates.
    #[must_use]
    pub fn is_std_stable(&self) -> bool {
        let Some(i) = self.last_index else { return false };
        let slot = &self.slots[i];
        slot.v_std.std() <= self.cfg.fire_std_v
            && slot.w_std.std() <= self.cfg.fire_std_w
            && slot.a_std.std() <= self.cfg.fire_std_a
    }

    /// Fire permission for a candidate aim pose.
    ///
    /// All of: slot exists and is available, every sliding spread is under
    /// its gate, and the candidate is within the aim cone.
    #[must_use]
    pub fn is_fire_valid(&self, pose: &Pose) -> bool {
        let Some(i) = self.last_index else { return false };
        let meta = &self.slots[i].meta;
        meta.exists
            && meta.available
            && self.is_std_stable()
            && pose.aim_offset().abs() <= self.cfg.fire_angle
    }

    /// One diagnostic line per existing slot.
    #[must_use]
    pub fn state_strings(&self) -> Vec<String> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.meta.exists)
            .map(|(i, s)| {
                let mark = if Some(i) == self.last_index { '*' } else { ' ' };
                format!(
                    "{mark}[{i}] n={} keep={} v={:.2} w={:.2} v_std={:.3} w_std={:.3} a_std={:.3}",
                    s.meta.count,
                    s.meta.keep,
                    s.model.state()[4].hypot(s.model.state()[5]),
                    s.model.state()[7],
                    s.v_std.std(),
                    s.w_std.std(),
                    s.a_std.std(),
                )
            })
            .collect()
    }
}
