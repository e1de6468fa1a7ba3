//! Constant-velocity tracking queue.
//!
//! The lightest variant: a linear six-state model
//! `(x, y, z, θ, vx, vy)` observed through `(x, y, z, θ)`. Height and
//! heading are modeled as constant; only the planar position carries a rate.
//! Good enough for targets that strafe without swinging, and cheap enough to
//! run on everything.

use autoaim_core::{angles, CoreResult, Pose, Timestamp};
use autoaim_filter::{LinearKalman, LinearObservation, LinearTransition, SlideStd};
use nalgebra::{SMatrix, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{associate, expire, select_face_on, Association, SlotMeta, TrackSlot};

pub(crate) struct CvTransition;

impl LinearTransition<6> for CvTransition {
    fn matrix(&self, dt: f64) -> SMatrix<f64, 6, 6> {
        let mut a = SMatrix::identity();
        a[(0, 4)] = dt;
        a[(1, 5)] = dt;
        a
    }
}

pub(crate) struct CvObservation;

impl LinearObservation<6, 4> for CvObservation {
    fn matrix(&self) -> SMatrix<f64, 4, 6> {
        let mut h = SMatrix::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h[(2, 2)] = 1.0;
        h[(3, 3)] = 1.0;
        h
    }
}

/// Tuning for [`CvTrackQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvQueueConfig {
    /// Number of slots held by the queue.
    pub capacity: usize,
    /// Updates required before a slot becomes available for aiming.
    pub min_count: u32,
    /// Association gate: maximum movement (m) between frames for the same target.
    pub max_distance: f64,
    /// Slot cleared when silent for longer than this (s).
    pub max_delay: f64,
    /// Minimum yaw difference between targets to count a toggle (rad).
    pub toggle_angle_offset: f64,
    /// Fire gate on velocity spread (m/s).
    pub max_std: f64,
    /// Fire gate on aim angle (rad).
    pub fire_angle: f64,
    /// Sliding window length for the velocity spread.
    pub std_window: usize,
    /// Process-noise diagonal.
    pub q_diag: [f64; 6],
    /// Observation-noise diagonal.
    pub r_diag: [f64; 4],
}

impl Default for CvQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            min_count: 5,
            max_distance: 0.1,
            max_delay: 0.3,
            toggle_angle_offset: 0.17,
            max_std: 0.1,
            fire_angle: 0.5,
            std_window: 10,
            q_diag: [1e-4, 1e-4, 1e-4, 1e-4, 1e-2, 1e-2],
            r_diag: [1e-4, 1e-4, 1e-4, 1e-4],
        }
    }
}

impl CvQueueConfig {
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

struct CvSlot {
    meta: SlotMeta,
    model: LinearKalman<6, 4>,
    v_std: SlideStd,
}

impl CvSlot {
    fn new(cfg: &CvQueueConfig) -> Self {
        let mut model = LinearKalman::new();
        model.set_process_diag(&cfg.q_diag);
        model.set_measurement_diag(&cfg.r_diag);
        Self {
            meta: SlotMeta::default(),
            model,
            v_std: SlideStd::new(cfg.std_window),
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
}

impl TrackSlot for CvSlot {
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
    }
}

/// Multi-target queue over the linear constant-velocity model.
pub struct CvTrackQueue {
    cfg: CvQueueConfig,
    slots: Vec<CvSlot>,
    frame_t: Option<Timestamp>,
    last_index: Option<usize>,
    toggle: i32,
}

impl Default for CvTrackQueue {
    fn default() -> Self {
        Self::new(CvQueueConfig::default())
    }
}

impl CvTrackQueue {
    /// Creates a queue; all slots are allocated here and reused afterwards.
    #[must_use]
    pub fn new(cfg: CvQueueConfig) -> Self {
        let slots = (0..cfg.capacity.max(1)).map(|_| CvSlot::new(&cfg)).collect();
        Self {
            cfg,
            slots,
            frame_t: None,
            last_index: None,
            toggle: 0,
        }
    }

    /// Re-tunes the process noise of every slot.
    pub fn set_process_diag(&mut self, diag: &[f64; 6]) {
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
    pub fn push(&mut self, pose: Pose, t: Timestamp) {
        match associate(&self.slots, &pose, t, self.cfg.max_distance, None) {
            Association::Matched(i) => {
                let dt = t.duration_since(&self.slots[i].meta.last_t);
                let slot = &mut self.slots[i];
                let aligned = angles::align(slot.model.state()[3], pose.yaw);
                let z = Vector4::new(pose.x, pose.y, pose.z, aligned);
                let ok =
                    slot.model.predict(&CvTransition, dt) && slot.model.update(&CvObservation, &z);
                if !ok {
                    debug!(slot = i, "model diverged, recycling slot");
                    slot.clear();
                    return;
                }
                let v = slot.model.state()[4].hypot(slot.model.state()[5]);
                slot.v_std.push(v);
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

    /// Per-frame housekeeping. Call once per frame with the frame time,
    /// after all pushes, including frames with no detections.
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

    /// Model-predicted pose of the selected target `delay` seconds ahead.
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        let Some(i) = self.last_index else { return Pose::ZERO };
        let slot = &self.slots[i];
        if !slot.meta.available {
            return if slot.meta.exists { slot.meta.last_pose } else { Pose::ZERO };
        }
        let ahead = CvTransition.matrix(delay) * slot.model.state();
        Pose::new(ahead[0], ahead[1], ahead[2], angles::align(0.0, ahead[3]))
    }

    /// Velocity spread of the selected slot.
    #[must_use]
    pub fn velocity_std(&self) -> f64 {
        self.last_index
            .map(|i| self.slots[i].v_std.std())
            .unwrap_or(f64::INFINITY)
    }

    /// True when the velocity spread has settled under the fire gate.
    #[must_use]
    pub fn is_std_valid(&self) -> bool {
        self.velocity_std() <= self.cfg.max_std
    }

    /// Fire permission for a candidate aim pose.
    #[must_use]
    pub fn is_fire_valid(&self, pose: &Pose) -> bool {
        let Some(i) = self.last_index else { return false };
        let meta = &self.slots[i].meta;
        meta.exists
            && meta.available
            && self.is_std_valid()
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
                    "{mark}[{i}] n={} keep={} v={:.2} v_std={:.3}",
                    s.meta.count,
                    s.meta.keep,
                    s.model.state()[4].hypot(s.model.state()[5]),
                    s.v_std.std(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn t(frame: u32) -> Timestamp {
        Timestamp::new(50, 0).offset(frame as f64 * 0.05)
    }

    #[test]
    fn test_static_target_stabilises() {
        let mut queue = CvTrackQueue::default();
        let pose = Pose::new(1.0, 0.0, 0.3, 0.0);
        for f in 0..20 {
            queue.push(pose, t(f));
            queue.update(t(f));
        }
        // Available well past min_count = 5, velocity spread near zero.
        assert!(queue.selected().is_some());
        assert!(queue.velocity_std() < 0.01);
        let p = queue.pose_at(0.1);
        assert_relative_eq!(p.x, 1.0, epsilon = 2e-3);
        assert_relative_eq!(p.z, 0.3, epsilon = 2e-3);
    }

    #[test]
    fn test_prediction_extrapolates_velocity() {
        let mut queue = CvTrackQueue::default();
        for f in 0..=20 {
            queue.push(Pose::new(f as f64 * 0.05, 0.0, 0.3, 0.0), t(f));
            queue.update(t(f));
        }
        assert_relative_eq!(queue.pose_at(0.1).x, 1.1, epsilon = 0.1);
    }

    #[test]
    fn test_yaw_alignment_across_seam() {
        let mut queue = CvTrackQueue::default();
        // Yaw walks across the ±π seam; the filter state must not jump by 2π.
        let mut yaw = 3.1;
        for f in 0..30 {
            yaw = angles::align(0.0, yaw + 0.01);
            queue.push(Pose::new(1.0, 0.0, 0.3, yaw), t(f));
            queue.update(t(f));
        }
        let i = queue.selected().unwrap();
        let theta = queue.slots[i].model.state()[3];
        // The unwrapped model heading stays within one revolution of the
        // observations it consumed.
        assert!((theta - 3.4).abs() < 0.2, "theta = {theta}");
    }

    #[test]
    fn test_empty_queue_answers_zero() {
        let queue = CvTrackQueue::default();
        assert_eq!(queue.pose_at(0.5), Pose::ZERO);
        assert!(!queue.is_fire_valid(&Pose::ZERO));
        assert!(queue.state_strings().is_empty());
    }
}
