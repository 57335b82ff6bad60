//! Contract of the external point-set alignment solver.
//!
//! The pipeline never implements registration itself; it hands two
//! [`PointSet`]s and a first guess to an [`Aligner`] and consumes the
//! [`MatchResult`].  The reference set is always pinned at the origin of the
//! keyframe's sensor frame, so guesses and results are sensor-local offsets.

use nalgebra::Matrix3;
use scanmatch_perception::point_set::PointSet;
use scanmatch_perception::transform::RigidTransform2D;

use crate::config::SolverConfig;

/// Outcome of one alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// `false` when the solver failed or did not converge; `transform` and
    /// `covariance` must then be ignored.
    pub valid: bool,
    /// Offset of `current` relative to `reference`, in the reference's
    /// sensor frame.
    pub transform: RigidTransform2D,
    /// `(x, y, θ)` covariance, present only when requested through
    /// [`SolverConfig::do_compute_covariance`].
    pub covariance: Option<Matrix3<f64>>,
}

impl MatchResult {
    pub fn valid(transform: RigidTransform2D) -> Self {
        Self {
            valid: true,
            transform,
            covariance: None,
        }
    }

    pub fn with_covariance(mut self, covariance: Matrix3<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            transform: RigidTransform2D::identity(),
            covariance: None,
        }
    }
}

/// A point-set registration procedure.
///
/// Implementations may keep internal scratch state between calls, hence
/// `&mut self`; they must not retain references to the point sets.
pub trait Aligner: Send {
    fn align(
        &mut self,
        reference: &PointSet,
        current: &PointSet,
        first_guess: RigidTransform2D,
        config: &SolverConfig,
    ) -> MatchResult;
}

impl<F> Aligner for F
where
    F: FnMut(&PointSet, &PointSet, RigidTransform2D, &SolverConfig) -> MatchResult + Send,
{
    fn align(
        &mut self,
        reference: &PointSet,
        current: &PointSet,
        first_guess: RigidTransform2D,
        config: &SolverConfig,
    ) -> MatchResult {
        self(reference, current, first_guess, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanmatch_perception::point_set::from_scan;
    use scanmatch_types::LaserScan;

    #[test]
    fn invalid_result_carries_identity() {
        let r = MatchResult::invalid();
        assert!(!r.valid);
        assert_eq!(r.transform, RigidTransform2D::identity());
        assert!(r.covariance.is_none());
    }

    #[test]
    fn closures_act_as_aligners() {
        let mut calls = 0;
        let mut echo_guess = |_: &PointSet, _: &PointSet, guess: RigidTransform2D, _: &SolverConfig| {
            calls += 1;
            MatchResult::valid(guess).with_covariance(Matrix3::identity())
        };
        let set = from_scan(&LaserScan::default());
        let guess = RigidTransform2D::new(0.1, 0.0, 0.0);
        let result = echo_guess.align(&set, &set, guess, &SolverConfig::default());
        assert_eq!(result.transform, guess);
        assert_eq!(result.covariance, Some(Matrix3::identity()));
        drop(echo_guess);
        assert_eq!(calls, 1);
    }
}
