//! Linear Kalman kernel, statically sized.
//!
//! State dimension `N` and observation dimension `M` are compile-time
//! constants; all matrices live on the stack and no allocation happens after
//! construction. The caller supplies the transition builder `A(dt)` and the
//! observation builder `H` through the two small traits below, mirroring the
//! shape of the extended kernel in [`crate::ekf`].

use nalgebra::{SMatrix, SVector};
use tracing::warn;

/// Fills the state-transition matrix for a time step.
pub trait LinearTransition<const N: usize> {
    /// `A(dt)` such that `x₁ = A·x₀`.
    fn matrix(&self, dt: f64) -> SMatrix<f64, N, N>;
}

/// Fills the observation matrix.
pub trait LinearObservation<const N: usize, const M: usize> {
    /// `H` such that `z = H·x`.
    fn matrix(&self) -> SMatrix<f64, M, N>;
}

/// Linear Kalman filter with `N`-dimensional state and `M`-dimensional
/// observations.
///
/// Numerical rules shared with [`crate::ekf::ExtendedKalman`]:
/// the innovation system is solved via Cholesky factorisation, the
/// covariance is re-symmetrised after every step, and a non-finite state or a
/// singular innovation covariance resets the filter instead of propagating.
#[derive(Debug, Clone)]
pub struct LinearKalman<const N: usize, const M: usize> {
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
    q: SMatrix<f64, N, N>,
    r: SMatrix<f64, M, M>,
}

impl<const N: usize, const M: usize> Default for LinearKalman<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const M: usize> LinearKalman<N, M> {
    /// Creates a cleared filter: zero state, identity covariance, mild
    /// default noise (overridden by the diagonal setters in practice).
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

    /// Mutable state access, used to seed a slot from its first observation
    /// and to re-align angular components.
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

    /// Time update: `x ← A·x`, `P ← A·P·Aᵀ + Q`.
    ///
    /// Returns `false` (after an internal reset) if the state went
    /// non-finite.
    pub fn predict<A: LinearTransition<N>>(&mut self, model: &A, dt: f64) -> bool {
        let a = model.matrix(dt);
        self.x = a * self.x;
        self.p = a * self.p * a.transpose() + self.q;
        self.symmetrize();
        self.guard()
    }

    /// Measurement update with observation `z`.
    ///
    /// Returns `false` (after an internal reset) on a singular innovation
    /// covariance or a non-finite result.
    pub fn update<H: LinearObservation<N, M>>(&mut self, model: &H, z: &SVector<f64, M>) -> bool {
        let h = model.matrix();
        let y = z - h * self.x;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 1-D constant-velocity model: state (x, v), observation (x).
    struct CvTransition;
    impl LinearTransition<2> for CvTransition {
        fn matrix(&self, dt: f64) -> SMatrix<f64, 2, 2> {
            let mut a = SMatrix::identity();
            a[(0, 1)] = dt;
            a
        }
    }
    struct PosObservation;
    impl LinearObservation<2, 1> for PosObservation {
        fn matrix(&self) -> SMatrix<f64, 1, 2> {
            SMatrix::<f64, 1, 2>::new(1.0, 0.0)
        }
    }

    #[test]
    fn test_tracks_constant_velocity() {
        let mut kf = LinearKalman::<2, 1>::new();
        kf.set_process_diag(&[0.01, 0.1]);
        kf.set_measurement_diag(&[0.01]);

        // Target moves at 2 m/s, observed every 0.1 s without noise.
        for i in 1..=50 {
            let t = i as f64 * 0.1;
            assert!(kf.predict(&CvTransition, 0.1));
            assert!(kf.update(&PosObservation, &SVector::<f64, 1>::new(2.0 * t)));
        }

        assert_relative_eq!(kf.state()[0], 10.0, epsilon = 0.05);
        assert_relative_eq!(kf.state()[1], 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_covariance_symmetric_non_negative_diag() {
        let mut kf = LinearKalman::<2, 1>::new();
        for i in 0..30 {
            kf.predict(&CvTransition, 0.05);
            kf.update(&PosObservation, &SVector::<f64, 1>::new(i as f64 * 0.3));
            let p = kf.covariance();
            for r in 0..2 {
                assert!(p[(r, r)] >= 0.0, "negative variance on diag {r}");
                for c in 0..2 {
                    assert_relative_eq!(p[(r, c)], p[(c, r)], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut kf = LinearKalman::<2, 1>::new();
        kf.predict(&CvTransition, 0.1);
        kf.update(&PosObservation, &SVector::<f64, 1>::new(5.0));
        kf.reset();
        assert_eq!(kf.state()[0], 0.0);
        assert_eq!(kf.state()[1], 0.0);
        assert_relative_eq!(kf.covariance()[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_observation_resets() {
        let mut kf = LinearKalman::<2, 1>::new();
        kf.predict(&CvTransition, 0.1);
        assert!(!kf.update(&PosObservation, &SVector::<f64, 1>::new(f64::NAN)));
        // Cleared state after the failed update.
        assert_eq!(kf.state()[0], 0.0);
    }

    #[test]
    fn test_update_pulls_toward_observation() {
        let mut kf = LinearKalman::<2, 1>::new();
        kf.set_measurement_diag(&[0.001]);
        kf.update(&PosObservation, &SVector::<f64, 1>::new(3.0));
        // Tight R and loose P: the estimate lands close to the observation.
        assert_relative_eq!(kf.state()[0], 3.0, epsilon = 0.01);
    }
}
