//! Freshest-target tracking queue.
//!
//! Shares the 11-state accelerating model with
//! [`AccelTrackQueue`](super::AccelTrackQueue) but follows a different
//! doctrine: instead of re-selecting the most face-on plate each frame it
//! stays with whichever slot was refreshed most recently. Suited to the
//! operator-in-the-loop mode where the gimbal should not hop between plates
//! on its own; fire permission is a simple freshness-and-maturity check.

use autoaim_core::{angles, CoreResult, Pose, Timestamp};
use autoaim_filter::ekf::{measure_state, propagate_state};
use autoaim_filter::ExtendedKalman;
use nalgebra::{SVector, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::accel::{AccelProcess, PoseMeasure};
use super::{associate, expire, select_freshest, Association, SlotMeta, TrackSlot};

/// Tuning for [`FocusTrackQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusQueueConfig {
    /// Number of slots held by the queue.
    pub capacity: usize,
    /// Updates required before a slot becomes available for aiming.
    pub min_count: u32,
    /// Association gate: maximum movement (m) between frames for the same target.
    pub max_distance: f64,
    /// Slot cleared when silent for longer than this (s).
    pub max_delay: f64,
    /// Process-noise diagonal.
    pub q_diag: [f64; 11],
    /// Observation-noise diagonal.
    pub r_diag: [f64; 4],
}

impl Default for FocusQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            min_count: 10,
            max_distance: 0.15,
            max_delay: 0.5,
            q_diag: [
                1e-4, 1e-4, 1e-4, 1e-4, 1e-2, 1e-2, 1e-2, 1e-2, 1e-1, 1e-1, 1e-1,
            ],
            r_diag: [1e-4, 1e-4, 1e-4, 1e-4],
        }
    }
}

impl FocusQueueConfig {
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

struct FocusSlot {
    meta: SlotMeta,
    model: ExtendedKalman<11, 4>,
}

impl FocusSlot {
    fn new(cfg: &FocusQueueConfig) -> Self {
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
        x[3] = pose.yaw;
    }
}

impl TrackSlot for FocusSlot {
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

/// Multi-target queue that follows the most recently refreshed slot.
pub struct FocusTrackQueue {
    cfg: FocusQueueConfig,
    slots: Vec<FocusSlot>,
    frame_t: Option<Timestamp>,
    last_index: Option<usize>,
}

impl Default for FocusTrackQueue {
    fn default() -> Self {
        Self::new(FocusQueueConfig::default())
    }
}

impl FocusTrackQueue {
    /// Creates a queue; all slots are allocated here and reused afterwards.
    #[must_use]
    pub fn new(cfg: FocusQueueConfig) -> Self {
        let slots = (0..cfg.capacity.max(1)).map(|_| FocusSlot::new(&cfg)).collect();
        Self {
            cfg,
            slots,
            frame_t: None,
            last_index: None,
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
    pub fn push(&mut self, pose: Pose, t: Timestamp) {
        match associate(&self.slots, &pose, t, self.cfg.max_distance, None) {
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
        self.last_index = select_freshest(&self.slots);
    }

    /// Latest raw observation of the followed target with its timestamp.
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

    /// Model-predicted pose of the followed target `delay` seconds ahead.
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

    /// Fire permission: the followed slot is mature and still fresh at `now`.
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
                    "{mark}[{i}] n={} keep={} v={:.2}",
                    s.meta.count,
                    s.meta.keep,
                    s.model.state()[4].hypot(s.model.state()[5]),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(frame: u32) -> Timestamp {
        Timestamp::new(70, 0).offset(frame as f64 * 0.05)
    }

    #[test]
    fn test_follows_freshest_slot() {
        let mut queue = FocusTrackQueue::default();
        // Both targets tracked to maturity.
        for f in 0..15 {
            queue.push(Pose::new(1.0, 0.0, 0.0, 0.0), t(f));
            queue.push(Pose::new(-1.0, 1.0, 0.0, 0.5), t(f));
            queue.update(t(f));
        }
        // Only the second target keeps reporting.
        for f in 15..20 {
            queue.push(Pose::new(-1.0, 1.0, 0.0, 0.5), t(f));
            queue.update(t(f));
        }
        let (pose, _) = queue.latest().unwrap();
        assert!(pose.x < 0.0, "queue should follow the fresh target");
    }

    #[test]
    fn test_fire_flag_freshness() {
        let mut queue = FocusTrackQueue::default();
        for f in 0..15 {
            queue.push(Pose::new(1.0, 0.0, 0.0, 0.0), t(f));
            queue.update(t(f));
        }
        let last = t(14);
        assert!(queue.fire_flag(last.offset(0.1)));
        assert!(!queue.fire_flag(last.offset(1.0)));
    }

    #[test]
    fn test_immature_slot_does_not_fire() {
        let mut queue = FocusTrackQueue::default();
        for f in 0..3 {
            queue.push(Pose::new(1.0, 0.0, 0.0, 0.0), t(f));
            queue.update(t(f));
        }
        assert!(!queue.fire_flag(t(3)));
    }
}
