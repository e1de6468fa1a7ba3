//! # autoaim-filter
//!
//! Estimation kernels for the autoaim targeting stack.
//!
//! - [`dual`]: forward-mode dual numbers and the [`dual::Real`] scalar
//!   abstraction. Process and observation models are written once, generic
//!   over the scalar, and differentiated automatically; the Jacobians the
//!   extended filter needs fall out of evaluating the model on duals.
//! - [`kf`]: the linear Kalman kernel [`kf::LinearKalman`], parameterised by
//!   state and observation dimension at compile time.
//! - [`ekf`]: the extended kernel [`ekf::ExtendedKalman`] for nonlinear
//!   process/observation maps.
//! - [`sliding`]: fixed-window scalar aggregators ([`sliding::SlideAvg`],
//!   [`sliding::SlideStd`], [`sliding::SlideWeightedAvg`]) used by the
//!   trackers to judge motion-model stability.
//!
//! ## Numerical rules
//!
//! Both kernels share the same discipline: the innovation system is solved
//! by Cholesky factorisation rather than explicit inversion, the covariance
//! is re-symmetrised after every step, and any non-finite state component
//! resets the filter to its cleared state (zero state, identity covariance)
//! instead of propagating poison.

#![forbid(unsafe_code)]

pub mod dual;
pub mod ekf;
pub mod kf;
pub mod sliding;

pub use dual::{Dual, Real};
pub use ekf::{ExtendedKalman, MeasurementModel, ProcessModel};
pub use kf::{LinearKalman, LinearObservation, LinearTransition};
pub use sliding::{SlideAvg, SlideStd, SlideWeightedAvg};
