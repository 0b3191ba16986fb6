//! Incremental eyeball centre and radius estimation.
//!
//! Each frame contributes points sampled around one eye socket, already mapped
//! into model space. Points are folded into a fixed-size sufficient statistic of
//! the algebraic sphere fit
//!
//! ```text
//! ‖p‖² = 2 c·p + d,    d = r² − ‖c‖²
//! ```
//!
//! which is linear in `(c, d)`. The estimator keeps one statistic per accepted
//! frame for the most recent `history_size` points and a running total of them;
//! the oldest frames are subtracted out as new ones arrive, so every update
//! costs O(points in the frame) and stale points age out. Within one window the
//! total does not depend on the order in which frames arrive. The published
//! estimate only changes when a candidate fit is strictly more confident than
//! the current one.

use crate::{
    config::EyeballConfig,
    constants::MIN_SPHERE_POINTS,
    face_model::EyePrior,
    landmarks::is_finite_point,
    Error, Result,
};
use nalgebra::{Matrix4, Point3, Vector4};
use std::collections::VecDeque;

/// Normal equations of the algebraic sphere fit over a point population
///
/// Points are stored relative to a fixed local origin, normally the eye's prior
/// centre, which keeps the normal equations well scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereStatistic {
    origin: Point3<f64>,
    count: usize,
    normal: Matrix4<f64>,
    moment: Vector4<f64>,
    energy: f64,
}

impl SphereStatistic {
    /// Empty statistic around `origin`
    #[must_use]
    pub fn new(origin: Point3<f64>) -> Self {
        Self {
            origin,
            count: 0,
            normal: Matrix4::zeros(),
            moment: Vector4::zeros(),
            energy: 0.0,
        }
    }

    /// Statistic of the given points around `origin`
    #[must_use]
    pub fn from_points(origin: Point3<f64>, points: &[Point3<f64>]) -> Self {
        let mut statistic = Self::new(origin);
        for point in points {
            statistic.add_point(point);
        }
        statistic
    }

    /// Fold one point in
    pub fn add_point(&mut self, point: &Point3<f64>) {
        let q = point - self.origin;
        let row = Vector4::new(2.0 * q.x, 2.0 * q.y, 2.0 * q.z, 1.0);
        let rhs = q.norm_squared();
        self.normal += row * row.transpose();
        self.moment += row * rhs;
        self.energy += rhs * rhs;
        self.count += 1;
    }

    /// Fold another statistic with the same origin in
    ///
    /// # Errors
    ///
    /// Returns an error if the origins differ
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.origin != other.origin {
            return Err(Error::InvalidInput(
                "Cannot merge sphere statistics with different origins".to_string(),
            ));
        }
        self.normal += other.normal;
        self.moment += other.moment;
        self.energy += other.energy;
        self.count += other.count;
        Ok(())
    }

    /// Take a previously merged statistic back out
    ///
    /// # Errors
    ///
    /// Returns an error if the origins differ or `other` holds more points
    pub fn subtract(&mut self, other: &Self) -> Result<()> {
        if self.origin != other.origin {
            return Err(Error::InvalidInput(
                "Cannot subtract sphere statistics with different origins".to_string(),
            ));
        }
        self.count = self.count.checked_sub(other.count).ok_or_else(|| {
            Error::InvalidInput("Cannot subtract more points than were accumulated".to_string())
        })?;
        self.normal -= other.normal;
        self.moment -= other.moment;
        self.energy -= other.energy;
        Ok(())
    }

    /// Number of points folded in
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Local origin of the statistic
    #[must_use]
    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    /// Whether every accumulated sum is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.energy.is_finite()
            && self.normal.iter().all(|v| v.is_finite())
            && self.moment.iter().all(|v| v.is_finite())
    }

    /// Least-squares sphere through all accumulated points
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Fewer than four points were accumulated (`InvalidInput`)
    /// - The normal equations are ill-conditioned (`IllConditioned`)
    /// - The solution is non-finite or has no real radius (`NumericInstability`)
    pub fn solve(&self, min_condition_ratio: f64) -> Result<SphereFit> {
        if self.count < MIN_SPHERE_POINTS {
            return Err(Error::InvalidInput(format!(
                "Sphere fit needs at least {} points, got {}",
                MIN_SPHERE_POINTS, self.count
            )));
        }
        if !self.is_finite() {
            return Err(Error::NumericInstability("Sphere statistic is not finite".to_string()));
        }

        let svd = self.normal.svd(true, true);
        let max = svd.singular_values.max();
        let ratio = if max > 0.0 { svd.singular_values.min() / max } else { 0.0 };
        if ratio <= min_condition_ratio {
            return Err(Error::IllConditioned(format!(
                "Sphere normal equations condition ratio {ratio:.3e}"
            )));
        }
        let solution = svd
            .solve(&self.moment, 0.0)
            .map_err(|e| Error::IllConditioned(e.to_string()))?;

        let center_local = solution.fixed_rows::<3>(0).into_owned();
        let radius_sq = solution[3] + center_local.norm_squared();
        if !(radius_sq.is_finite() && radius_sq > 0.0) {
            return Err(Error::NumericInstability(format!(
                "Sphere fit has no real radius (r² = {radius_sq:.3e})"
            )));
        }
        let radius = radius_sq.sqrt();

        // SSE of the algebraic residuals, recovered from the sums
        let sse = (self.energy - 2.0 * solution.dot(&self.moment) + solution.dot(&(self.normal * solution))).max(0.0);
        let algebraic_rms = (sse / self.count as f64).sqrt();
        // |p−c|² − r² ≈ 2r·(|p−c| − r) near the surface
        let rms_residual = algebraic_rms / (2.0 * radius);

        let center = self.origin + center_local;
        if !(is_finite_point(&center) && rms_residual.is_finite()) {
            return Err(Error::NumericInstability("Sphere fit is not finite".to_string()));
        }

        Ok(SphereFit {
            center,
            radius,
            rms_residual,
            point_count: self.count,
        })
    }
}

/// Result of a sphere fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereFit {
    /// Sphere centre
    pub center: Point3<f64>,
    /// Sphere radius
    pub radius: f64,
    /// RMS geometric residual (distance from the surface)
    pub rms_residual: f64,
    /// Points the fit was computed from
    pub point_count: usize,
}

impl SphereFit {
    /// Confidence in `[0, 1)`: `1 / (1 + se / r)` with `se` the standard error
    /// of the fit, `rms / √n`
    #[must_use]
    pub fn confidence(&self) -> f64 {
        if self.point_count == 0 || self.radius <= 0.0 {
            return 0.0;
        }
        let standard_error = self.rms_residual / (self.point_count as f64).sqrt();
        1.0 / (1.0 + standard_error / self.radius)
    }

    /// RMS geometric residual of `points` against this sphere
    #[must_use]
    pub fn residual_of(&self, points: &[Point3<f64>]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = points
            .iter()
            .map(|p| ((p - self.center).norm() - self.radius).powi(2))
            .sum();
        (sum_sq / points.len() as f64).sqrt()
    }
}

/// Published eyeball estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeballEstimate {
    /// Eyeball centre in model space
    pub center: Point3<f64>,
    /// Eyeball radius in model units
    pub radius: f64,
    /// Confidence of the fit the estimate came from
    pub confidence: f64,
}

/// Why a frame was not folded into the statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The frame disagrees with the current estimate far beyond its residual
    OutlierFrame,
    /// The candidate normal equations are singular or ill-conditioned
    IllConditioned,
    /// The candidate fit is non-finite
    NonFinite,
    /// The candidate radius is outside the configured bounds
    RadiusOutOfBounds,
}

/// What an update did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Points stored; not enough accumulated for a fit yet
    Accumulating {
        /// Points accumulated so far
        points: usize,
    },
    /// The candidate fit was more confident and is now published
    Refined(EyeballEstimate),
    /// Points stored, but the candidate fit was not better; previous estimate kept
    Retained,
    /// The search is complete; the frame was ignored
    Frozen,
    /// The frame was discarded; before the first fit the points accumulated
    /// so far are discarded with it
    Rejected(RejectReason),
}

/// Running centre/radius estimate for one eye
#[derive(Debug, Clone)]
pub struct EyeballEstimator {
    config: EyeballConfig,
    prior: EyePrior,
    statistic: SphereStatistic,
    window: VecDeque<SphereStatistic>,
    best: Option<SphereFit>,
    accepted_updates: usize,
    center_detected: bool,
    search_completed: bool,
    last_improvement_ms: Option<u64>,
}

impl EyeballEstimator {
    /// Fresh, unconverged estimator around the given prior
    #[must_use]
    pub fn new(prior: EyePrior, config: EyeballConfig) -> Self {
        Self {
            statistic: SphereStatistic::new(prior.center),
            window: VecDeque::new(),
            config,
            prior,
            best: None,
            accepted_updates: 0,
            center_detected: false,
            search_completed: false,
            last_improvement_ms: None,
        }
    }

    /// Fold one frame's model-space eye points in
    ///
    /// Frames that would destabilise the estimate are reported as
    /// [`UpdateOutcome::Rejected`] and leave the estimator untouched, with one
    /// exception: while no fit has been published, a failed fit also drops the
    /// points accumulated so far, so a bad start cannot pin the estimator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `points` is empty (`InvalidInput`)
    /// - A point has a non-finite coordinate (`NumericInstability`)
    pub fn update(&mut self, points: &[Point3<f64>], timestamp_ms: u64) -> Result<UpdateOutcome> {
        if points.is_empty() {
            return Err(Error::InvalidInput("No eye points supplied".to_string()));
        }
        if !points.iter().all(is_finite_point) {
            return Err(Error::NumericInstability("Non-finite eye point".to_string()));
        }

        if self.search_completed {
            let idle = self
                .last_improvement_ms
                .map_or(u64::MAX, |last| timestamp_ms.saturating_sub(last));
            if idle <= self.config.refresh_time_ms {
                return Ok(UpdateOutcome::Frozen);
            }
            log::debug!("No improvement for {} ms, resuming eyeball search", idle);
            self.search_completed = false;
        }

        if let Some(best) = &self.best {
            let frame_residual = best.residual_of(points);
            let limit = self.config.outlier_ratio * best.rms_residual.max(self.config.residual_floor);
            if frame_residual > limit {
                log::debug!(
                    "Rejecting outlier eye frame: residual {:.3e} above {:.3e}",
                    frame_residual,
                    limit
                );
                return Ok(UpdateOutcome::Rejected(RejectReason::OutlierFrame));
            }
        }

        let frame = SphereStatistic::from_points(self.prior.center, points);
        let mut candidate = self.statistic.clone();
        candidate.merge(&frame)?;
        let mut evicted = 0;
        for old in &self.window {
            if candidate.count() <= self.config.history_size {
                break;
            }
            candidate.subtract(old)?;
            evicted += 1;
        }
        if !candidate.is_finite() {
            return Ok(UpdateOutcome::Rejected(RejectReason::NonFinite));
        }

        if candidate.count() < self.config.min_points {
            self.commit(candidate, frame, evicted);
            return Ok(UpdateOutcome::Accumulating {
                points: self.statistic.count(),
            });
        }

        let fit = match candidate.solve(self.config.min_condition_ratio) {
            Ok(fit) => fit,
            Err(Error::IllConditioned(msg)) => {
                log::debug!("Discarding eye frame: {}", msg);
                return Ok(self.reject(RejectReason::IllConditioned));
            }
            Err(e) => {
                log::debug!("Discarding eye frame: {}", e);
                return Ok(self.reject(RejectReason::NonFinite));
            }
        };

        let (min_radius, max_radius) = self.config.radius_bounds;
        if !(min_radius..=max_radius).contains(&fit.radius) {
            log::debug!("Discarding eye frame: radius {:.4} out of bounds", fit.radius);
            return Ok(self.reject(RejectReason::RadiusOutOfBounds));
        }

        self.commit(candidate, frame, evicted);

        let confidence = fit.confidence();
        let current = self.best.as_ref().map_or(0.0, SphereFit::confidence);
        if confidence <= current {
            return Ok(UpdateOutcome::Retained);
        }

        self.best = Some(fit);
        self.accepted_updates += 1;
        self.last_improvement_ms = Some(timestamp_ms);

        if confidence >= self.config.min_confidence && self.accepted_updates >= self.config.min_accepted_updates {
            if !self.center_detected {
                log::info!(
                    "Eyeball centre detected: ({:.4}, {:.4}, {:.4}), radius {:.4}, confidence {:.5}",
                    fit.center.x,
                    fit.center.y,
                    fit.center.z,
                    fit.radius,
                    confidence
                );
            }
            self.center_detected = true;
        }
        if confidence >= self.config.reasonable_confidence {
            self.search_completed = true;
        }

        Ok(UpdateOutcome::Refined(EyeballEstimate {
            center: fit.center,
            radius: fit.radius,
            confidence,
        }))
    }

    fn commit(&mut self, total: SphereStatistic, frame: SphereStatistic, evicted: usize) {
        self.window.drain(..evicted);
        self.window.push_back(frame);
        self.statistic = total;
    }

    fn reject(&mut self, reason: RejectReason) -> UpdateOutcome {
        if self.best.is_none() && !self.window.is_empty() {
            log::debug!(
                "First eyeball fit failed, dropping {} accumulated points",
                self.statistic.count()
            );
            self.window.clear();
            self.statistic = SphereStatistic::new(self.prior.center);
        }
        UpdateOutcome::Rejected(reason)
    }

    /// Current estimate
    ///
    /// # Errors
    ///
    /// Returns `NotYetConverged` until the centre has been detected
    pub fn estimate(&self) -> Result<EyeballEstimate> {
        match &self.best {
            Some(fit) if self.center_detected => Ok(EyeballEstimate {
                center: fit.center,
                radius: fit.radius,
                confidence: fit.confidence(),
            }),
            _ => Err(Error::NotYetConverged),
        }
    }

    /// Whether [`EyeballEstimator::estimate`] will succeed
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.center_detected
    }

    /// Whether refinement has stopped at the reasonable confidence
    #[must_use]
    pub fn is_search_completed(&self) -> bool {
        self.search_completed
    }

    /// Confidence of the published fit, zero before the first fit
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.best.as_ref().map_or(0.0, SphereFit::confidence)
    }

    /// Number of times the published estimate was refined
    #[must_use]
    pub fn accepted_updates(&self) -> usize {
        self.accepted_updates
    }

    /// Statistic of the points currently in the history window
    #[must_use]
    pub fn statistic(&self) -> &SphereStatistic {
        &self.statistic
    }

    /// The eye prior this estimator started from
    #[must_use]
    pub fn prior(&self) -> &EyePrior {
        &self.prior
    }

    /// Back to the fresh, unconverged state
    pub fn reset(&mut self) {
        *self = Self::new(self.prior, self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn prior() -> EyePrior {
        EyePrior {
            center: Point3::new(-0.06, -0.06, 0.02),
            radius: 0.02,
        }
    }

    /// Deterministic points on a spherical cap facing −z
    fn cap_points(center: Point3<f64>, radius: f64, count: usize, phase: f64) -> Vec<Point3<f64>> {
        (0..count)
            .map(|i| {
                let t = i as f64 + phase;
                let polar = 0.15 + 0.8 * ((t * 0.37).sin() * 0.5 + 0.5);
                let azimuth = t * 2.399_963;
                let dir = Vector3::new(polar.sin() * azimuth.cos(), polar.sin() * azimuth.sin(), -polar.cos());
                center + dir * radius
            })
            .collect()
    }

    fn small_config() -> EyeballConfig {
        EyeballConfig {
            min_points: 40,
            reasonable_confidence: 1.0,
            ..EyeballConfig::default()
        }
    }

    #[test]
    fn test_statistic_exact_sphere() {
        let center = Point3::new(-0.058, -0.061, 0.023);
        let points = cap_points(center, 0.021, 60, 0.0);
        let fit = SphereStatistic::from_points(prior().center, &points).solve(1e-12).unwrap();

        assert_relative_eq!(fit.center, center, epsilon = 1e-9);
        assert_relative_eq!(fit.radius, 0.021, epsilon = 1e-9);
        assert!(fit.rms_residual < 1e-6);
    }

    #[test]
    fn test_statistic_needs_four_points() {
        let points = cap_points(prior().center, 0.02, 3, 0.0);
        let result = SphereStatistic::from_points(prior().center, &points).solve(1e-12);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_statistic_coplanar_points_are_ill_conditioned() {
        let points: Vec<_> = (0..20)
            .map(|i| Point3::new(f64::from(i) * 0.001, f64::from(i % 5) * 0.002, 0.0))
            .collect();
        let result = SphereStatistic::from_points(Point3::origin(), &points).solve(1e-12);
        assert!(matches!(result, Err(Error::IllConditioned(_))));
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let points = cap_points(prior().center, 0.02, 30, 1.0);
        let whole = SphereStatistic::from_points(prior().center, &points);

        let mut merged = SphereStatistic::from_points(prior().center, &points[..12]);
        merged
            .merge(&SphereStatistic::from_points(prior().center, &points[12..]))
            .unwrap();

        assert_eq!(merged.count(), whole.count());
        assert_relative_eq!(merged.energy, whole.energy, epsilon = 1e-18);
    }

    #[test]
    fn test_merge_rejects_other_origin() {
        let mut a = SphereStatistic::new(Point3::origin());
        let b = SphereStatistic::new(Point3::new(1.0, 0.0, 0.0));
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_confidence_grows_with_points() {
        let small = SphereFit {
            center: Point3::origin(),
            radius: 0.02,
            rms_residual: 1e-3,
            point_count: 100,
        };
        let large = SphereFit {
            point_count: 400,
            ..small
        };
        assert!(large.confidence() > small.confidence());
    }

    #[test]
    fn test_not_converged_initially() {
        let estimator = EyeballEstimator::new(prior(), small_config());
        assert!(matches!(estimator.estimate(), Err(Error::NotYetConverged)));
        assert!(!estimator.is_converged());
    }

    #[test]
    fn test_accumulates_then_refines() {
        let truth = Point3::new(-0.058, -0.062, 0.022);
        let mut estimator = EyeballEstimator::new(prior(), small_config());

        let first = estimator.update(&cap_points(truth, 0.021, 11, 0.0), 0).unwrap();
        assert_eq!(first, UpdateOutcome::Accumulating { points: 11 });

        let mut refined = false;
        for frame in 1..10u32 {
            let outcome = estimator
                .update(&cap_points(truth, 0.021, 11, f64::from(frame) * 11.0), u64::from(frame) * 33)
                .unwrap();
            refined |= matches!(outcome, UpdateOutcome::Refined(_));
        }
        assert!(refined);

        let estimate = estimator.estimate().unwrap();
        assert_relative_eq!(estimate.center, truth, epsilon = 1e-6);
        assert_relative_eq!(estimate.radius, 0.021, epsilon = 1e-6);
    }

    #[test]
    fn test_nan_frame_leaves_state_untouched() {
        let mut estimator = EyeballEstimator::new(prior(), small_config());
        estimator.update(&cap_points(prior().center, 0.02, 11, 0.0), 0).unwrap();
        let before = estimator.statistic().clone();

        let mut points = cap_points(prior().center, 0.02, 11, 5.0);
        points[4].z = f64::NAN;
        assert!(matches!(
            estimator.update(&points, 33),
            Err(Error::NumericInstability(_))
        ));
        assert_eq!(estimator.statistic(), &before);
    }

    #[test]
    fn test_empty_frame_is_invalid() {
        let mut estimator = EyeballEstimator::new(prior(), small_config());
        assert!(matches!(estimator.update(&[], 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_failed_first_fit_drops_accumulated_points() {
        let mut estimator = EyeballEstimator::new(prior(), small_config());
        let mut last = None;
        for frame in 0..4u32 {
            let points = cap_points(prior().center, 0.04, 11, f64::from(frame) * 11.0);
            last = Some(estimator.update(&points, u64::from(frame)).unwrap());
        }
        assert_eq!(last, Some(UpdateOutcome::Rejected(RejectReason::RadiusOutOfBounds)));
        assert_eq!(estimator.statistic().count(), 0);

        let outcome = estimator.update(&cap_points(prior().center, 0.02, 11, 50.0), 4).unwrap();
        assert_eq!(outcome, UpdateOutcome::Accumulating { points: 11 });
    }

    #[test]
    fn test_subtract_undoes_merge() {
        let points = cap_points(prior().center, 0.02, 30, 2.0);
        let base = SphereStatistic::from_points(prior().center, &points[..20]);
        let extra = SphereStatistic::from_points(prior().center, &points[20..]);

        let mut total = base.clone();
        total.merge(&extra).unwrap();
        total.subtract(&extra).unwrap();

        assert_eq!(total.count(), base.count());
        assert_relative_eq!(total.normal, base.normal, epsilon = 1e-15);
        assert!(total.subtract(&SphereStatistic::from_points(prior().center, &points)).is_err());
    }

    #[test]
    fn test_history_window_is_bounded() {
        let config = EyeballConfig {
            history_size: 55,
            ..small_config()
        };
        let mut estimator = EyeballEstimator::new(prior(), config);
        for frame in 0..20u32 {
            estimator
                .update(&cap_points(prior().center, 0.02, 11, f64::from(frame) * 11.0), u64::from(frame))
                .unwrap();
            assert!(estimator.statistic().count() <= 55);
        }
        assert_eq!(estimator.statistic().count(), 55);
        assert!(estimator.is_converged());
    }

    #[test]
    fn test_search_freezes_and_refreshes() {
        let config = EyeballConfig {
            min_points: 40,
            reasonable_confidence: 0.99,
            min_confidence: 0.9,
            refresh_time_ms: 1_000,
            ..EyeballConfig::default()
        };
        let truth = prior().center;
        let mut estimator = EyeballEstimator::new(prior(), config);
        for frame in 0..5u32 {
            estimator
                .update(&cap_points(truth, 0.02, 11, f64::from(frame) * 11.0), u64::from(frame) * 10)
                .unwrap();
        }
        assert!(estimator.is_search_completed());

        let frozen = estimator.update(&cap_points(truth, 0.02, 11, 99.0), 500).unwrap();
        assert_eq!(frozen, UpdateOutcome::Frozen);

        let resumed = estimator.update(&cap_points(truth, 0.02, 11, 120.0), 5_000).unwrap();
        assert_ne!(resumed, UpdateOutcome::Frozen);
    }

    #[test]
    fn test_reset() {
        let mut estimator = EyeballEstimator::new(prior(), small_config());
        for frame in 0..10u32 {
            estimator
                .update(&cap_points(prior().center, 0.02, 11, f64::from(frame) * 11.0), u64::from(frame))
                .unwrap();
        }
        assert!(estimator.is_converged());

        estimator.reset();
        assert!(!estimator.is_converged());
        assert_eq!(estimator.statistic().count(), 0);
        assert_eq!(estimator.accepted_updates(), 0);
    }
}
