//! Polar-kinematics tracking queue.
//!
//! Eight-state model `(x, y, z, v, vz, θ, ω, a)` where `θ` is the direction
//! of travel, `v` the speed along it and `a` the tangential acceleration.
//! Only position `(x, y, z)` is observed; the heading is inferred from the
//! motion itself, which makes this variant usable when the detector's yaw
//! estimate is too poor to trust (long range, heavy motion blur).

use autoaim_core::{angles, CoreResult, Pose, Timestamp};
use autoaim_filter::ekf::{measure_state, propagate_state};
use autoaim_filter::{ExtendedKalman, MeasurementModel, ProcessModel, Real};
use nalgebra::{SVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{associate, expire, select_face_on, Association, SlotMeta, TrackSlot};

/// Speed-and-heading kinematics: position advances along the heading.
pub(crate) struct PolarProcess;

impl ProcessModel<8> for PolarProcess {
    fn apply<T: Real>(&self, x0: &[T; 8], x1: &mut [T; 8], dt: f64) {
        let half_dt2 = 0.5 * dt * dt;
        let cos_h = x0[5].cos();
        let sin_h = x0[5].sin();
        x1[0] = x0[0] + x0[3] * cos_h * dt + x0[7] * cos_h * half_dt2;
        x1[1] = x0[1] + x0[3] * sin_h * dt + x0[7] * sin_h * half_dt2;
        x1[2] = x0[2] + x0[4] * dt;
        x1[3] = x0[3] + x0[7] * dt;
        x1[4] = x0[4];
        x1[5] = x0[5] + x0[6] * dt;
        x1[6] = x0[6];
        x1[7] = x0[7];
    }
}

/// Position-only observation.
pub(crate) struct PositionMeasure;

impl MeasurementModel<8, 3> for PositionMeasure {
    fn apply<T: Real>(&self, x: &[T; 8], y: &mut [T; 3]) {
        y[0] = x[0];
        y[1] = x[1];
        y[2] = x[2];
    }
}

/// Tuning for [`PolarTrackQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolarQueueConfig {
    /// Number of slots held by the queue.
    pub capacity: usize,
    /// Updates required before a slot becomes available for aiming.
    pub min_count: u32,
    /// Association gate: maximum movement (m) between frames for the same target.
    pub max_distance: f64,
    /// Slot cleared when silent for longer than this (s).
    pub max_delay: f64,
    /// Process-noise diagonal.
    pub q_diag: [f64; 8],
    /// Observation-noise diagonal.
    pub r_diag: [f64; 3],
}

impl Default for PolarQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            min_count: 10,
            max_distance: 0.15,
            max_delay: 0.5,
            q_diag: [1e-4, 1e-4, 1e-4, 1e-2, 1e-2, 1e-2, 1e-2, 1e-1],
            r_diag: [1e-4, 1e-4, 1e-4],
        }
    }
}

impl PolarQueueConfig {
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

struct PolarSlot {
    meta: SlotMeta,
    model: ExtendedKalman<8, 3>,
}

impl PolarSlot {
    fn new(cfg: &PolarQueueConfig) -> Self {
        let mut model = ExtendedKalman::new();
        model.set_process_diag(&cfg.q_diag);
        model.set_measurement_diag(&cfg.r_diag);
        Self {
            meta: SlotMeta::default(),
            model,
        }
    }

    fn seed(&mut self, pose: &Pose) {
        self.model.reset();
        let x = self.model.state_mut();
        x[0] = pose.x;
        x[1] = pose.y;
        x[2] = pose.z;
        // Speed and heading start at rest; the filter infers both from the
        // position track.
    }
}

impl TrackSlot for PolarSlot {
    fn meta(&self) -> &SlotMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut SlotMeta {
        &mut self.meta
    }
    fn clear(&mut self) {
        self.meta.clear();
        self.model.reset();
    }
}

/// Multi-target queue over the polar model.
pub struct PolarTrackQueue {
    cfg: PolarQueueConfig,
    slots: Vec<PolarSlot>,
    frame_t: Option<Timestamp>,
    last_index: Option<usize>,
}

impl Default for PolarTrackQueue {
    fn default() -> Self {
        Self::new(PolarQueueConfig::default())
    }
}

impl PolarTrackQueue {
    /// Creates a queue; all slots are allocated here and reused afterwards.
    #[must_use]
    pub fn new(cfg: PolarQueueConfig) -> Self {
        let slots = (0..cfg.capacity.max(1)).map(|_| PolarSlot::new(&cfg)).collect();
        Self {
            cfg,
            slots,
            frame_t: None,
            last_index: None,
        }
    }

    /// Re-tunes the process noise of every slot.
    pub fn set_process_diag(&mut self, diag: &[f64; 8]) {
        self.cfg.q_diag = *diag;
        for slot in &mut self.slots {
            slot.model.set_process_diag(diag);
        }
    }

    /// Re-tunes the observation noise of every slot.
    pub fn set_measurement_diag(&mut self, diag: &[f64; 3]) {
        self.cfg.r_diag = *diag;
        for slot in &mut self.slots {
            slot.model.set_measurement_diag(diag);
        }
    }

    /// Associates one observation to a slot and advances its filter.
    ///
    /// The pose's yaw is retained for bookkeeping but never enters the
    /// filter; this variant trusts positions only.
    pub fn push(&mut self, pose: Pose, t: Timestamp) {
        match associate(&self.slots, &pose, t, self.cfg.max_distance, None) {
            Association::Matched(i) => {
                let dt = t.duration_since(&self.slots[i].meta.last_t);
                let slot = &mut self.slots[i];
                if slot.meta.count == 1 {
                    // Bootstrap heading and speed from the first displacement;
                    // at rest the linearisation has no gradient onto either.
                    let dx = pose.x - slot.meta.last_pose.x;
                    let dy = pose.y - slot.meta.last_pose.y;
                    let step = dx.hypot(dy);
                    if step > 1e-4 && dt > 1e-6 {
                        let x = slot.model.state_mut();
                        x[5] = dy.atan2(dx);
                        x[3] = step / dt;
                    }
                }
                let z = Vector3::new(pose.x, pose.y, pose.z);
                let ok = slot.model.predict(&PolarProcess, dt)
                    && slot.model.update(&PositionMeasure, &z);
                if !ok {
                    debug!(slot = i, "model diverged, recycling slot");
                    slot.clear();
                    return;
                }
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
        self.last_index = select_face_on(&self.slots);
    }

    /// Latest raw observation of the selected target with its timestamp.
    #[must_use]
    pub fn latest(&self) -> Option<(Pose, Timestamp)> {
        let i = self.last_index?;
        let meta = &self.slots[i].meta;
        if meta.exists {
            Some((meta.last_pose, meta.last_t))
        } else {
            None
        }
    }

    /// Model-predicted pose `delay` seconds ahead.
    ///
    /// The returned yaw is the inferred direction of travel, not a plate
    /// normal.
    #[must_use]
    pub fn pose_at(&self, delay: f64) -> Pose {
        let Some(i) = self.last_index else { return Pose::ZERO };
        let slot = &self.slots[i];
        if !slot.meta.available {
            return if slot.meta.exists { slot.meta.last_pose } else { Pose::ZERO };
        }
        let ahead = propagate_state(&PolarProcess, slot.model.state(), delay);
        let z: SVector<f64, 3> = measure_state(&PositionMeasure, &ahead);
        Pose::new(z[0], z[1], z[2], angles::align(0.0, ahead[5]))
    }

    /// Speed estimate along the inferred heading.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.last_index
            .map(|i| self.slots[i].model.state()[3])
            .unwrap_or(0.0)
    }

    /// Fire permission: the selected slot is mature and still fresh at `now`.
    #[must_use]
    pub fn fire_flag(&self, now: Timestamp) -> bool {
        let Some(i) = self.last_index else { return false };
        let meta = &self.slots[i].meta;
        meta.exists
            && meta.available
            && now.duration_since(&meta.last_t) <= self.cfg.max_delay
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
                    "{mark}[{i}] n={} keep={} v={:.2} heading={:.2}",
                    s.meta.count,
                    s.meta.keep,
                    s.model.state()[3],
                    s.model.state()[5],
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
        Timestamp::new(90, 0).offset(frame as f64 * 0.05)
    }

    #[test]
    fn test_infers_heading_from_motion() {
        let mut queue = PolarTrackQueue::default();
        // Straight run along +y at 1 m/s; detector yaw deliberately garbage.
        for f in 0..=40 {
            queue.push(Pose::new(2.0, f as f64 * 0.05, 0.0, -2.0), t(f));
            queue.update(t(f));
        }
        let i = queue.last_index.unwrap();
        let x = queue.slots[i].model.state();
        // Speed along heading reconstructs the 1 m/s track.
        let vy = x[3] * x[5].sin();
        assert_relative_eq!(vy, 1.0, epsilon = 0.3);
    }

    #[test]
    fn test_prediction_leads_target() {
        let mut queue = PolarTrackQueue::default();
        for f in 0..=40 {
            queue.push(Pose::new(f as f64 * 0.05, 0.0, 0.3, 0.0), t(f));
            queue.update(t(f));
        }
        let ahead = queue.pose_at(0.2);
        assert_relative_eq!(ahead.x, 2.0 + 0.2, epsilon = 0.15);
    }

    #[test]
    fn test_yaw_never_enters_filter() {
        let mut queue = PolarTrackQueue::default();
        for f in 0..=20 {
            // Wildly spinning detector yaw must not disturb the position.
            let yaw = (f as f64 * 2.1).sin() * 3.0;
            queue.push(Pose::new(1.0, 1.0, 0.0, yaw), t(f));
            queue.update(t(f));
        }
        let (pose, _) = queue.latest().unwrap();
        assert_relative_eq!(pose.x, 1.0, epsilon = 1e-9);
        let predicted = queue.pose_at(0.0);
        assert_relative_eq!(predicted.x, 1.0, epsilon = 0.05);
    }
}
