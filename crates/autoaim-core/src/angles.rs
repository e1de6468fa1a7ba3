//! Wrap-safe angle arithmetic.
//!
//! Angles live on a circle; filter states live in ℝ. The helpers here bridge
//! the two: [`align`] lifts a wrapped measurement to the representative
//! nearest a reference (so an unwrapped filter state never sees a 2π jump),
//! [`safe_sub`] gives the signed shortest-arc difference, and [`face_jump`]
//! detects the visible plate switching to an adjacent face of a multi-face
//! target.

use std::f64::consts::{PI, TAU};

/// Returns the representative of `raw` (mod 2π) nearest to `reference`.
///
/// The result `r` satisfies `r ≡ raw (mod 2π)` and `r − reference ∈ [−π, π]`.
/// Idempotent: aligning an already-aligned value is a no-op.
#[must_use]
pub fn align(reference: f64, raw: f64) -> f64 {
    raw - TAU * ((raw - reference + PI) / TAU).floor()
}

/// Signed shortest-arc difference `a − b`, mapped to [−π, π].
#[must_use]
pub fn safe_sub(a: f64, b: f64) -> f64 {
    align(0.0, a - b)
}

/// Angular spacing between adjacent faces of an `faces`-sided target.
#[must_use]
pub fn face_span(faces: u32) -> f64 {
    TAU / f64::from(faces.max(1))
}

/// Detects a face change between an observed yaw and the modeled heading.
///
/// Returns the number of face steps (positive in the direction of the
/// observed jump) needed to bring the model onto the observed face, or `None`
/// when the observation still belongs to the modeled face. A residual beyond
/// half the face span means the detector is now seeing an adjacent plate.
#[must_use]
pub fn face_jump(observed: f64, modeled: f64, faces: u32) -> Option<i32> {
    let span = face_span(faces);
    let d = safe_sub(observed, modeled);
    if d.abs() > span / 2.0 {
        Some((d / span).round() as i32)
    } else {
        None
    }
}
