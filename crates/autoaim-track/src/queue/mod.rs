//! Multi-target tracking queues.
//!
//! A queue owns a fixed array of target slots, allocated once at
//! construction and recycled for the rest of its life; a slot's identity is
//! its index. Each frame the detector pushes every observed plate pose, then
//! calls [`update`](AccelTrackQueue::update) once; the queue associates
//! observations to slots by distance, advances each slot's filter, ages out
//! slots that stopped receiving observations, and nominates the plate most
//! face-on to the sensor as the current target.
//!
//! The four queue types share that skeleton and differ in their motion
//! models:
//!
//! | Type | State | Filter |
//! |------|-------|--------|
//! | [`CvTrackQueue`] | (x, y, z, θ, vx, vy) | linear |
//! | [`AccelTrackQueue`] | (x, y, z, θ, vx, vy, vz, ω, ax, ay, αθ) | extended |
//! | [`FocusTrackQueue`] | same 11-state, follows the freshest slot | extended |
//! | [`PolarTrackQueue`] | (x, y, z, v, vz, θ, ω, a), heading from velocity | extended |

mod accel;
mod cv;
mod focus;
mod polar;

pub use accel::{AccelQueueConfig, AccelTrackQueue};
pub use cv::{CvQueueConfig, CvTrackQueue};
pub use focus::{FocusQueueConfig, FocusTrackQueue};
pub use polar::{PolarQueueConfig, PolarTrackQueue};

use autoaim_core::{angles, CoreError, CoreResult, Pose, Timestamp};
use tracing::trace;

/// Shared sanity checks for the queue configs.
pub(crate) fn validate_common(
    capacity: usize,
    min_count: u32,
    max_distance: f64,
    max_delay: f64,
) -> CoreResult<()> {
    if capacity == 0 {
        return Err(CoreError::invalid_parameter("capacity", 0.0, ">= 1"));
    }
    if min_count == 0 {
        return Err(CoreError::invalid_parameter("min_count", 0.0, ">= 1"));
    }
    if max_distance <= 0.0 {
        return Err(CoreError::invalid_parameter(
            "max_distance",
            max_distance,
            "> 0",
        ));
    }
    if max_delay <= 0.0 {
        return Err(CoreError::invalid_parameter("max_delay", max_delay, "> 0"));
    }
    Ok(())
}

/// Rejects negative entries on a noise diagonal.
pub(crate) fn validate_diag(name: &'static str, diag: &[f64]) -> CoreResult<()> {
    match diag.iter().find(|v| !v.is_finite() || **v < 0.0) {
        Some(v) => Err(CoreError::invalid_parameter(name, *v, ">= 0 and finite")),
        None => Ok(()),
    }
}

/// Grace frames a slot survives without a matching observation.
pub(crate) const KEEP_FRAMES: u8 = 5;

/// Bookkeeping common to every slot type.
#[derive(Debug, Clone)]
pub(crate) struct SlotMeta {
    pub last_t: Timestamp,
    pub last_pose: Pose,
    pub count: u32,
    pub keep: u8,
    pub exists: bool,
    pub available: bool,
}

impl Default for SlotMeta {
    fn default() -> Self {
        Self {
            last_t: Timestamp::new(0, 0),
            last_pose: Pose::ZERO,
            count: 0,
            keep: KEEP_FRAMES,
            exists: false,
            available: false,
        }
    }
}

impl SlotMeta {
    /// Records a matched observation.
    pub fn refresh(&mut self, pose: Pose, t: Timestamp, min_count: u32) {
        self.last_t = t;
        self.last_pose = pose;
        self.count += 1;
        self.keep = KEEP_FRAMES;
        self.exists = true;
        self.available = self.count >= min_count;
    }

    /// Returns the slot to its cleared state. The stored pose is kept for
    /// diagnostics; `exists` gates every consumer.
    pub fn clear(&mut self) {
        self.count = 0;
        self.keep = KEEP_FRAMES;
        self.exists = false;
        self.available = false;
    }
}

/// A slot that can be cleared as a whole (meta, filter, windows).
pub(crate) trait TrackSlot {
    fn meta(&self) -> &SlotMeta;
    fn meta_mut(&mut self) -> &mut SlotMeta;
    /// Full reset: bookkeeping, filter state and sliding windows.
    fn clear(&mut self);
}

/// Outcome of associating one observation against the slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Association {
    /// Same target as slot `i`.
    Matched(usize),
    /// New target; seed empty slot `i`.
    Fresh(usize),
    /// Stale timestamp for the matched slot; discard without touching it.
    Stale,
    /// No matching slot and no free slot.
    Dropped,
}

/// Distance-gated nearest-slot association.
///
/// Picks the existing slot whose last pose lies within `max_distance` of the
/// observation (smallest distance wins; `yaw_gate`, when set, additionally
/// requires the plate yaws to agree within that angle). Falls back to the
/// first empty slot. Observations that match a slot but do not advance its
/// clock are reported [`Association::Stale`].
pub(crate) fn associate<S: TrackSlot>(
    slots: &[S],
    pose: &Pose,
    t: Timestamp,
    max_distance: f64,
    yaw_gate: Option<f64>,
) -> Association {
    let mut best: Option<(usize, f64)> = None;
    for (i, slot) in slots.iter().enumerate() {
        let meta = slot.meta();
        if !meta.exists {
            continue;
        }
        let d = meta.last_pose.distance(pose);
        if d > max_distance {
            continue;
        }
        if let Some(gate) = yaw_gate {
            if angles::safe_sub(pose.yaw, meta.last_pose.yaw).abs() > gate {
                continue;
            }
        }
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }

    if let Some((i, _)) = best {
        if t <= slots[i].meta().last_t {
            return Association::Stale;
        }
        return Association::Matched(i);
    }

    match slots.iter().position(|s| !s.meta().exists) {
        Some(i) => Association::Fresh(i),
        None => {
            trace!("observation dropped: no matching or free slot");
            Association::Dropped
        }
    }
}

/// Ages out slots that missed the current frame.
///
/// A slot older than the newest push (`frame_t`) missed the frame and loses
/// one grace frame. Independently, a slot silent for longer than `max_delay`
/// as of `now` is overdue. Either exhausted grace or overdue age clears the
/// slot, so targets expire even when the detector stops reporting
/// altogether.
pub(crate) fn expire<S: TrackSlot>(
    slots: &mut [S],
    frame_t: Option<Timestamp>,
    now: Timestamp,
    max_delay: f64,
) {
    for (i, slot) in slots.iter_mut().enumerate() {
        let meta = slot.meta();
        if !meta.exists {
            continue;
        }
        let missed_frame = frame_t.is_some_and(|ft| meta.last_t < ft);
        if missed_frame {
            slot.meta_mut().keep = slot.meta().keep.saturating_sub(1);
        }
        let age = now.duration_since(&slot.meta().last_t);
        if slot.meta().keep == 0 || age > max_delay {
            tracing::debug!(slot = i, age, "slot expired");
            slot.clear();
        }
    }
}

/// Index of the available slot most face-on to the sensor.
pub(crate) fn select_face_on<S: TrackSlot>(slots: &[S]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, slot) in slots.iter().enumerate() {
        let meta = slot.meta();
        if !meta.exists || !meta.available {
            continue;
        }
        let offset = meta.last_pose.aim_offset().abs();
        if best.map_or(true, |(_, b)| offset < b) {
            best = Some((i, offset));
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the most recently refreshed available slot.
pub(crate) fn select_freshest<S: TrackSlot>(slots: &[S]) -> Option<usize> {
    let mut best: Option<(usize, Timestamp)> = None;
    for (i, slot) in slots.iter().enumerate() {
        let meta = slot.meta();
        if !meta.exists || !meta.available {
            continue;
        }
        if best.map_or(true, |(_, t)| meta.last_t > t) {
            best = Some((i, meta.last_t));
        }
    }
    best.map(|(i, _)| i)
}
