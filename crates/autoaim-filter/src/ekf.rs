//! Extended Kalman kernel with autodiff Jacobians.
//!
//! The caller writes the process map `f` and the observation map `h` once,
//! generic over the scalar type (see [`crate::dual::Real`]); the kernel
//! evaluates them on dual numbers to obtain both the mapped state and the
//! Jacobian in a single pass. No hand-derived Jacobians, no drift between
//! the model and its linearisation.

use nalgebra::{SMatrix, SVector};
use tracing::warn;

use crate::dual::{Dual, Real};

/// Nonlinear state-transition map `x₁ = f(x₀, dt)`.
///
/// Implementations must be generic over the scalar so the kernel can
/// differentiate them; `dt` stays a plain `f64` (it is never differentiated).
pub trait ProcessModel<const N: usize> {
    /// Applies the transition to `x0`, writing the successor state to `x1`.
    fn apply<T: Real>(&self, x0: &[T; N], x1: &mut [T; N], dt: f64);
}

/// Nonlinear observation map `z = h(x)`.
pub trait MeasurementModel<const N: usize, const M: usize> {
    /// Applies the observation map to `x`, writing the expected measurement
    /// to `y`.
    fn apply<T: Real>(&self, x: &[T; N], y: &mut [T; M]);
}

/// Extended Kalman filter with `N`-dimensional state and `M`-dimensional
/// observations.
///
/// Shares the numerical rules of [`crate::kf::LinearKalman`]: Cholesky solve
/// for the innovation system, covariance re-symmetrisation after every step,
/// reset on non-finite state or singular innovation covariance.
#[derive(Debug, Clone)]
pub struct ExtendedKalman<const N: usize, const M: usize> {
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
    q: SMatrix<f64, N, N>,
    r: SMatrix<f64, M, M>,
}

impl<const N: usize, const M: usize> Default for ExtendedKalman<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const M: usize> ExtendedKalman<N, M> {
    /// Creates a cleared filter: zero state, identity covariance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            x: SVector::zeros(),
            p: SMatrix::identity(),
            q: SMatrix::identity() * 0.01,
            r: SMatrix::identity() * 0.01,
        }
    }

    /// Current state estimate.
    #[must_use]
    pub fn state(&self) -> &SVector<f64, N> {
        &self.x
    }

    /// Mutable state access, used to seed slots and re-align angular
    /// components against fresh observations.
    pub fn state_mut(&mut self) -> &mut SVector<f64, N> {
        &mut self.x
    }

    /// Current covariance.
    #[must_use]
    pub fn covariance(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    /// Sets the process-noise diagonal.
    pub fn set_process_diag(&mut self, diag: &[f64; N]) {
        self.q = SMatrix::from_fn(|i, j| if i == j { diag[i] } else { 0.0 });
    }

    /// Sets the observation-noise diagonal.
    pub fn set_measurement_diag(&mut self, diag: &[f64; M]) {
        self.r = SMatrix::from_fn(|i, j| if i == j { diag[i] } else { 0.0 });
    }

    /// Clears the filter: `x ← 0`, `P ← I`. Noise tunings are preserved.
    pub fn reset(&mut self) {
        self.x = SVector::zeros();
        self.p = SMatrix::identity();
    }

    /// Time update through the nonlinear transition.
    ///
    /// Evaluates `f` on duals seeded at the current state: the value part
    /// becomes the predicted state, the partials form `F` for the covariance
    /// step `P ← F·P·Fᵀ + Q`.
    pub fn predict<F: ProcessModel<N>>(&mut self, model: &F, dt: f64) -> bool {
        let mut seed = [Dual::<N>::constant(0.0); N];
        for i in 0..N {
            seed[i] = Dual::variable(self.x[i], i);
        }
        let mut out = [Dual::<N>::constant(0.0); N];
        model.apply(&seed, &mut out, dt);

        let mut f = SMatrix::<f64, N, N>::zeros();
        for i in 0..N {
            self.x[i] = out[i].re;
            for j in 0..N {
                f[(i, j)] = out[i].eps[j];
            }
        }

        self.p = f * self.p * f.transpose() + self.q;
        self.symmetrize();
        self.guard()
    }

    /// Measurement update with observation `z` through the nonlinear
    /// observation map.
    pub fn update<H: MeasurementModel<N, M>>(&mut self, model: &H, z: &SVector<f64, M>) -> bool {
        let mut seed = [Dual::<N>::constant(0.0); N];
        for i in 0..N {
            seed[i] = Dual::variable(self.x[i], i);
        }
        let mut out = [Dual::<N>::constant(0.0); M];
        model.apply(&seed, &mut out);

        let mut predicted = SVector::<f64, M>::zeros();
        let mut h = SMatrix::<f64, M, N>::zeros();
        for i in 0..M {
            predicted[i] = out[i].re;
            for j in 0..N {
                h[(i, j)] = out[i].eps[j];
            }
        }

        let y = z - predicted;
        let s = h * self.p * h.transpose() + self.r;

        let Some(chol) = s.cholesky() else {
            warn!("singular innovation covariance, resetting filter");
            self.reset();
            return false;
        };

        // K = P·Hᵀ·S⁻¹ computed as (S⁻¹·H·P)ᵀ, since S is symmetric.
        let k = chol.solve(&(h * self.p)).transpose();
        self.x += k * y;
        self.p = (SMatrix::identity() - k * h) * self.p;
        self.symmetrize();
        self.guard()
    }

    fn symmetrize(&mut self) {
        self.p = (self.p + self.p.transpose()) * 0.5;
    }

    fn guard(&mut self) -> bool {
        if self.x.iter().all(|v| v.is_finite()) && self.p.iter().all(|v| v.is_finite()) {
            true
        } else {
            warn!("non-finite filter state, resetting");
            self.reset();
            false
        }
    }
}

/// Propagates a state through a process model on plain `f64`, without
/// touching any covariance. Used by pose queries that look `delay` seconds
/// ahead of the filter.
#[must_use]
pub fn propagate_state<const N: usize, F: ProcessModel<N>>(
    model: &F,
    x: &SVector<f64, N>,
    dt: f64,
) -> SVector<f64, N> {
    let mut x0 = [0.0_f64; N];
    x0.copy_from_slice(x.as_slice());
    let mut x1 = [0.0_f64; N];
    model.apply(&x0, &mut x1, dt);
    SVector::from_column_slice(&x1)
}

/// Maps a state through a measurement model on plain `f64`.
#[must_use]
pub fn measure_state<const N: usize, const M: usize, H: MeasurementModel<N, M>>(
    model: &H,
    x: &SVector<f64, N>,
) -> SVector<f64, M> {
    let mut x0 = [0.0_f64; N];
    x0.copy_from_slice(x.as_slice());
    let mut y = [0.0_f64; M];
    model.apply(&x0, &mut y);
    SVector::from_column_slice(&y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Planar turn model: (x, y, heading, speed), constant speed and heading
    /// rate folded into `heading` externally. Nonlinear through cos/sin.
    struct TurnProcess;
    impl ProcessModel<4> for TurnProcess {
        fn apply<T: Real>(&self, x0: &[T; 4], x1: &mut [T; 4], dt: f64) {
            x1[0] = x0[0] + x0[2].cos() * x0[3] * dt;
            x1[1] = x0[1] + x0[2].sin() * x0[3] * dt;
            x1[2] = x0[2];
            x1[3] = x0[3];
        }
    }

    /// Position-only observation.
    struct PosMeasure;
    impl MeasurementModel<4, 2> for PosMeasure {
        fn apply<T: Real>(&self, x: &[T; 4], y: &mut [T; 2]) {
            y[0] = x[0];
            y[1] = x[1];
        }
    }

    #[test]
    fn test_predict_matches_closed_form() {
        let mut ekf = ExtendedKalman::<4, 2>::new();
        *ekf.state_mut() = SVector::<f64, 4>::new(1.0, 2.0, 0.5, 3.0);
        assert!(ekf.predict(&TurnProcess, 0.1));

        assert_relative_eq!(ekf.state()[0], 1.0 + 0.5_f64.cos() * 0.3, epsilon = 1e-12);
        assert_relative_eq!(ekf.state()[1], 2.0 + 0.5_f64.sin() * 0.3, epsilon = 1e-12);
    }

    /// The autodiff Jacobian must match the symbolic derivative; exercised
    /// indirectly by checking covariance growth against the hand-built F.
    #[test]
    fn test_jacobian_matches_symbolic() {
        let mut ekf = ExtendedKalman::<4, 2>::new();
        ekf.set_process_diag(&[0.0; 4]);
        let (heading, speed, dt) = (0.7, 2.0, 0.05);
        *ekf.state_mut() = SVector::<f64, 4>::new(0.0, 0.0, heading, speed);

        let p0 = *ekf.covariance();
        assert!(ekf.predict(&TurnProcess, dt));

        let mut f = SMatrix::<f64, 4, 4>::identity();
        f[(0, 2)] = -heading.sin() * speed * dt;
        f[(0, 3)] = heading.cos() * dt;
        f[(1, 2)] = heading.cos() * speed * dt;
        f[(1, 3)] = heading.sin() * dt;
        let expected = f * p0 * f.transpose();

        let p1 = ekf.covariance();
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(p1[(i, j)], expected[(i, j)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_converges_on_straight_track() {
        let mut ekf = ExtendedKalman::<4, 2>::new();
        ekf.set_process_diag(&[0.001, 0.001, 0.01, 0.1]);
        ekf.set_measurement_diag(&[0.001, 0.001]);
        // Start with position known, motion unknown.
        *ekf.state_mut() = SVector::<f64, 4>::new(0.0, 0.0, 0.0, 0.0);

        // Target runs along +x at 2 m/s.
        for i in 1..=80 {
            let t = i as f64 * 0.02;
            assert!(ekf.predict(&TurnProcess, 0.02));
            assert!(ekf.update(&PosMeasure, &SVector::<f64, 2>::new(2.0 * t, 0.0)));
        }

        // Speed along the heading should reconstruct the 2 m/s track.
        let v = ekf.state()[3] * ekf.state()[2].cos();
        assert_relative_eq!(v, 2.0, epsilon = 0.25);
        // Position hugs the last observation (x = 2 · 1.6 s) under tight R.
        assert_relative_eq!(ekf.state()[0], 3.2, epsilon = 0.05);
    }

    #[test]
    fn test_propagate_state_pure() {
        let x = SVector::<f64, 4>::new(1.0, 0.0, 0.0, 2.0);
        let ahead = propagate_state(&TurnProcess, &x, 0.5);
        assert_relative_eq!(ahead[0], 2.0, epsilon = 1e-12);
        // Original untouched semantics: calling again from x gives the same.
        let again = propagate_state(&TurnProcess, &x, 0.5);
        assert_eq!(ahead, again);
    }

    #[test]
    fn test_measure_state_pure() {
        let x = SVector::<f64, 4>::new(1.0, -2.0, 0.3, 1.0);
        let z = measure_state(&PosMeasure, &x);
        assert_relative_eq!(z[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(z[1], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_divergence_resets() {
        let mut ekf = ExtendedKalman::<4, 2>::new();
        *ekf.state_mut() = SVector::<f64, 4>::new(f64::INFINITY, 0.0, 0.0, 0.0);
        assert!(!ekf.predict(&TurnProcess, 0.1));
        assert_eq!(ekf.state()[0], 0.0);
        assert_relative_eq!(ekf.covariance()[(0, 0)], 1.0, epsilon = 1e-12);
    }
}
