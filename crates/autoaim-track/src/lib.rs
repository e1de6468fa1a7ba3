//! # autoaim-track
//!
//! The perception-and-tracking core of the autoaim targeting stack.
//!
//! An external detector emits timestamped [`autoaim_core::Pose`] observations
//! of candidate armor plates; the estimators here maintain per-target motion
//! models, decide which target is currently trackable, predict where it will
//! be at a requested future time, and emit fire-permission signals.
//!
//! ## Modules
//!
//! - [`queue`]: multi-target tracking queues. Four motion-model variants
//!   share one slot skeleton: distance-gated association, a count/keep slot
//!   lifecycle, face-on target selection, toggle detection and fire gating.
//! - [`antitop`]: estimators for spinning targets. An extended filter whose
//!   observation model encodes the geometry of an armor plate orbiting a
//!   hidden center recovers that center, the spin rate and the orbit radius
//!   from single-plate observations.
//! - [`rune`]: the energy-rune estimator: a planar blade pattern rotating
//!   with known kinematics (constant speed, or a sinusoidal speed law for
//!   the big rune), with a transition-synchronised fire window.
//! - [`attack`]: target-priority selectors consuming the
//!   `(ArmorId, aim angle, timestamp)` stream the trackers emit.
//!
//! ## Conventions
//!
//! Per-frame operations never return errors: a stale or unassociable
//! observation is dropped, and a diverged filter resets its slot (see the
//! crate-level docs of `autoaim-filter`). The core holds no global state and
//! performs no I/O; independent instances can track independent enemies
//! side by side.

#![forbid(unsafe_code)]

pub mod antitop;
pub mod attack;
pub mod queue;
pub mod rune;

pub use antitop::{SmoothedSpinEstimator, SpinConfig, SpinEstimator};
pub use attack::{AttackSelector, DeadLocker, Filtrate, FreshCenter};
pub use queue::{
    AccelQueueConfig, AccelTrackQueue, CvQueueConfig, CvTrackQueue, FocusQueueConfig,
    FocusTrackQueue, PolarQueueConfig, PolarTrackQueue,
};
pub use rune::{RuneConfig, RuneEstimator, RuneKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
