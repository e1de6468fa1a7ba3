//! Target-priority selectors.
//!
//! The trackers emit a stream of `(ArmorId, aim angle, timestamp)` reports,
//! one per identified plate per frame. A selector folds that stream into a
//! single answer to "which robot do we engage right now". Three doctrines
//! are provided behind one trait so the attack policy can be swapped at
//! configuration time.
//!
//! All selectors keep one fixed slot per identity, expire slots on a
//! freshness horizon at [`refresh`](AttackSelector::refresh), and are O(#ids)
//! per call with no allocation after construction.

use autoaim_core::{ArmorId, Timestamp};

/// How long a reported target stays eligible without a new report (s).
const FRESH_HORIZON: f64 = 0.5;

/// Reports considered simultaneous when their timestamps are this close (s).
const SAME_FRAME: f64 = 0.02;

#[derive(Debug, Clone, Copy)]
struct TargetSlot {
    last_t: Timestamp,
    angle: f64,
    exists: bool,
}

impl Default for TargetSlot {
    fn default() -> Self {
        Self {
            last_t: Timestamp::new(0, 0),
            angle: 1e3,
            exists: false,
        }
    }
}

/// A pluggable engagement-priority policy.
pub trait AttackSelector {
    /// Reports a plate sighting: identity, absolute aim angle, time.
    fn push(&mut self, id: ArmorId, angle: f64, t: Timestamp);

    /// The identity to engage, or [`ArmorId::Unknown`] when nothing
    /// qualifies.
    fn pop(&self) -> ArmorId;

    /// Expires reports older than the freshness horizon. Call once per
    /// frame before [`pop`](Self::pop).
    fn refresh(&mut self, now: Timestamp);

    /// Forgets everything.
    fn clear(&mut self);
}

fn expire_slots(slots: &mut [TargetSlot], now: Timestamp) {
    for slot in slots.iter_mut() {
        if slot.exists && now.duration_since(&slot.last_t) > FRESH_HORIZON {
            slot.exists = false;
        }
    }
}

/// Latest-sighting policy: whoever was reported most recently wins.
///
/// Degenerates gracefully under flicker: the selector simply follows the
/// detector's attention.
#[derive(Default)]
pub struct Filtrate {
    slots: [TargetSlot; ArmorId::ALL.len()],
}

impl Filtrate {
    /// Creates an empty selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttackSelector for Filtrate {
    fn push(&mut self, id: ArmorId, angle: f64, t: Timestamp) {
        let slot = &mut self.slots[id.index()];
        slot.last_t = t;
        slot.angle = angle;
        slot.exists = true;
    }

    fn pop(&self) -> ArmorId {
        let mut best: Option<(usize, Timestamp)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.exists {
                continue;
            }
            if best.map_or(true, |(_, t)| slot.last_t > t) {
                best = Some((i, slot.last_t));
            }
        }
        best.map_or(ArmorId::Unknown, |(i, _)| ArmorId::ALL[i])
    }

    fn refresh(&mut self, now: Timestamp) {
        expire_slots(&mut self.slots, now);
    }

    fn clear(&mut self) {
        self.slots = Default::default();
    }
}

/// Center-first policy: among the freshest reports, the plate closest to
/// the sight line wins.
#[derive(Default)]
pub struct FreshCenter {
    slots: [TargetSlot; ArmorId::ALL.len()],
}

impl FreshCenter {
    /// Creates an empty selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttackSelector for FreshCenter {
    fn push(&mut self, id: ArmorId, angle: f64, t: Timestamp) {
        let slot = &mut self.slots[id.index()];
        slot.last_t = t;
        slot.angle = angle;
        slot.exists = true;
    }

    fn pop(&self) -> ArmorId {
        // Newest report defines the current frame ...
        let Some(newest) = self
            .slots
            .iter()
            .filter(|s| s.exists)
            .map(|s| s.last_t)
            .max()
        else {
            return ArmorId::Unknown;
        };
        // ... and within that frame the smallest aim angle wins.
        let mut best: Option<(usize, f64)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.exists || newest.duration_since(&slot.last_t) > SAME_FRAME {
                continue;
            }
            let a = slot.angle.abs();
            if best.map_or(true, |(_, ba)| a < ba) {
                best = Some((i, a));
            }
        }
        best.map_or(ArmorId::Unknown, |(i, _)| ArmorId::ALL[i])
    }

    fn refresh(&mut self, now: Timestamp) {
        expire_slots(&mut self.slots, now);
    }

    fn clear(&mut self) {
        self.slots = Default::default();
    }
}

/// Sticky policy: once a target is engaged, stay on it while it keeps
/// reporting; re-decide only when it drops off.
///
/// Prevents the gimbal from sawing between two equally tempting targets.
pub struct DeadLocker {
    slots: [TargetSlot; ArmorId::ALL.len()],
    locked: Option<ArmorId>,
}

impl Default for DeadLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLocker {
    /// Creates an empty selector with no lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            locked: None,
        }
    }

    /// The currently locked identity, if any.
    #[must_use]
    pub fn locked(&self) -> Option<ArmorId> {
        self.locked
    }
}

impl AttackSelector for DeadLocker {
    fn push(&mut self, id: ArmorId, angle: f64, t: Timestamp) {
        let slot = &mut self.slots[id.index()];
        slot.last_t = t;
        slot.angle = angle;
        slot.exists = true;
        if self.locked.is_none() {
            self.locked = Some(id);
        }
    }

    fn pop(&self) -> ArmorId {
        if let Some(id) = self.locked {
            if self.slots[id.index()].exists {
                return id;
            }
        }
        // Lock fell through; take the most centered fresh target.
        let mut best: Option<(usize, f64)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.exists {
                continue;
            }
            let a = slot.angle.abs();
            if best.map_or(true, |(_, ba)| a < ba) {
                best = Some((i, a));
            }
        }
        best.map_or(ArmorId::Unknown, |(i, _)| ArmorId::ALL[i])
    }

    fn refresh(&mut self, now: Timestamp) {
        expire_slots(&mut self.slots, now);
        if let Some(id) = self.locked {
            if !self.slots[id.index()].exists {
                self.locked = None;
            }
        }
    }

    fn clear(&mut self) {
        self.slots = Default::default();
        self.locked = None;
    }
}
