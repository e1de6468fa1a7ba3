//! # autoaim-core
//!
//! Foundational types for the autoaim targeting stack.
//!
//! This crate provides the building blocks shared by every estimator in the
//! workspace:
//!
//! - **Data types**: [`Pose`] and [`RuneObservation`] for detector output,
//!   [`Timestamp`] for frame timing, [`ArmorId`] for target identities.
//! - **Angle arithmetic**: the [`angles`] module with wrap-safe alignment and
//!   shortest-arc subtraction. Every angle that enters a filter goes through
//!   these helpers; raw subtraction of yaws is never correct at the ±π seam.
//! - **Error types**: [`CoreError`] for configuration and validation
//!   failures. Per-frame estimator operations never return errors; bad input
//!   degrades to a no-op as described by the estimator crates.
//!
//! ## Example
//!
//! ```rust
//! use autoaim_core::{angles, Pose, Timestamp};
//!
//! let pose = Pose::new(1.0, 0.0, 0.3, 0.0);
//! let t0 = Timestamp::new(100, 0);
//! let t1 = Timestamp::new(100, 50_000_000);
//!
//! assert!((t1.duration_since(&t0) - 0.05).abs() < 1e-12);
//! assert!(angles::safe_sub(pose.yaw, std::f64::consts::TAU).abs() < 1e-12);
//! ```

#![forbid(unsafe_code)]

pub mod angles;
pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::{ArmorId, Pose, RuneObservation, Timestamp};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
