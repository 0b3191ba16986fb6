//! Affine alignment between the face template and observed landmarks.
//!
//! The forward transform maps model (template) space into image space; the
//! inverse maps observations back into model space. Points go through the full
//! affine map, directions only through its linear part.

use crate::{
    config::AlignmentConfig,
    constants::MIN_CORRESPONDENCES,
    face_model::FaceTemplate,
    landmarks::{is_finite_point, LandmarkLayout, LandmarkSet},
    Error, Result,
};
use nalgebra::{Affine3, Matrix3, Matrix4, Point3, Vector3};

/// Affine map from model space to image space, with its inverse
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentTransform {
    forward: Affine3<f64>,
    inverse: Affine3<f64>,
    rms_residual: f64,
}

impl AlignmentTransform {
    /// Build a transform from a linear part and a translation
    ///
    /// # Errors
    ///
    /// Returns an error if the linear part is singular or any value is non-finite
    pub fn from_parts(linear: Matrix3<f64>, translation: Vector3<f64>) -> Result<Self> {
        if !linear.iter().chain(translation.iter()).all(|v| v.is_finite()) {
            return Err(Error::NumericInstability("Transform has non-finite entries".to_string()));
        }
        let linear_inv = linear
            .try_inverse()
            .ok_or_else(|| Error::DegenerateAlignment("Linear part is singular".to_string()))?;
        let translation_inv = -(linear_inv * translation);

        Ok(Self {
            forward: compose(&linear, &translation),
            inverse: compose(&linear_inv, &translation_inv),
            rms_residual: 0.0,
        })
    }

    /// Forward affine map (model → image)
    #[must_use]
    pub fn forward(&self) -> &Affine3<f64> {
        &self.forward
    }

    /// Inverse affine map (image → model)
    #[must_use]
    pub fn inverse(&self) -> &Affine3<f64> {
        &self.inverse
    }

    /// Linear part of the forward map
    #[must_use]
    pub fn linear(&self) -> Matrix3<f64> {
        self.forward.matrix().fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Translation of the forward map
    #[must_use]
    pub fn translation(&self) -> Vector3<f64> {
        self.forward.matrix().fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// RMS distance between fitted and observed stable landmarks
    #[must_use]
    pub fn rms_residual(&self) -> f64 {
        self.rms_residual
    }

    /// Map a model-space point into image space
    #[must_use]
    pub fn to_image_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.forward.transform_point(point)
    }

    /// Map an image-space point into model space
    #[must_use]
    pub fn to_model_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.inverse.transform_point(point)
    }

    /// Map a model-space direction into image space (no translation)
    #[must_use]
    pub fn to_image_vector(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        self.forward.transform_vector(direction)
    }

    /// Map an image-space direction into model space (no translation)
    #[must_use]
    pub fn to_model_vector(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        self.inverse.transform_vector(direction)
    }
}

fn compose(linear: &Matrix3<f64>, translation: &Vector3<f64>) -> Affine3<f64> {
    let mut matrix = Matrix4::identity();
    matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(linear);
    matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    Affine3::from_matrix_unchecked(matrix)
}

/// Least-squares affine fit of the face template to observed landmarks
#[derive(Debug, Clone, Default)]
pub struct AlignmentEstimator {
    config: AlignmentConfig,
}

impl AlignmentEstimator {
    /// Create an estimator with the given tolerances
    #[must_use]
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    /// Fit the template's stable points to a frame's landmarks
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The layout and template disagree on the stable subset size
    /// - The landmark set is missing a stable index
    /// - The fit itself fails (see [`AlignmentEstimator::estimate`])
    pub fn align(
        &self,
        template: &FaceTemplate,
        landmarks: &LandmarkSet,
        layout: &LandmarkLayout,
    ) -> Result<AlignmentTransform> {
        if layout.stable.len() != template.stable_points().len() {
            return Err(Error::InsufficientCorrespondence(format!(
                "Layout has {} stable landmarks but the template has {}",
                layout.stable.len(),
                template.stable_points().len()
            )));
        }
        let observed = landmarks.select(&layout.stable)?;
        self.estimate(template.stable_points(), &observed)
    }

    /// Compute the affine transform `T` minimising `Σ ‖T(templateᵢ) − observedᵢ‖²`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Fewer than four correspondences are given, the slices differ in length,
    ///   or the template points are collinear/coplanar (`InsufficientCorrespondence`)
    /// - The template scatter or the fitted linear part is ill-conditioned, or the
    ///   residual exceeds the configured bound (`DegenerateAlignment`)
    /// - An input or fitted value is not finite (`NumericInstability`)
    pub fn estimate(&self, template: &[Point3<f64>], observed: &[Point3<f64>]) -> Result<AlignmentTransform> {
        if template.len() != observed.len() {
            return Err(Error::InsufficientCorrespondence(format!(
                "Mismatched correspondences: {} template points, {} observed",
                template.len(),
                observed.len()
            )));
        }
        if template.len() < MIN_CORRESPONDENCES {
            return Err(Error::InsufficientCorrespondence(format!(
                "Need at least {} correspondences, got {}",
                MIN_CORRESPONDENCES,
                template.len()
            )));
        }
        if !template.iter().chain(observed).all(is_finite_point) {
            return Err(Error::NumericInstability("Non-finite alignment input".to_string()));
        }

        let template_centroid = centroid(template);
        let observed_centroid = centroid(observed);

        // Centred scatter of the template and cross-covariance with the observations
        let mut scatter = Matrix3::zeros();
        let mut cross = Matrix3::zeros();
        for (p, q) in template.iter().zip(observed) {
            let dp = p - template_centroid;
            let dq = q - observed_centroid;
            scatter += dp * dp.transpose();
            cross += dq * dp.transpose();
        }

        let ratio = condition_ratio(&scatter);
        if ratio <= self.config.rank_tolerance {
            return Err(Error::InsufficientCorrespondence(
                "Stable landmarks are collinear or coplanar".to_string(),
            ));
        }
        if ratio < self.config.min_condition_ratio {
            return Err(Error::DegenerateAlignment(format!(
                "Template scatter condition ratio {ratio:.3e} below {:.3e}",
                self.config.min_condition_ratio
            )));
        }

        let scatter_inv = scatter
            .try_inverse()
            .ok_or_else(|| Error::DegenerateAlignment("Template scatter is singular".to_string()))?;
        let linear = cross * scatter_inv;

        let linear_ratio = condition_ratio(&linear);
        if linear_ratio < self.config.min_condition_ratio {
            return Err(Error::DegenerateAlignment(format!(
                "Fitted linear part condition ratio {linear_ratio:.3e} below {:.3e}",
                self.config.min_condition_ratio
            )));
        }

        let translation = observed_centroid.coords - linear * template_centroid.coords;
        let mut transform = AlignmentTransform::from_parts(linear, translation)?;

        let sum_sq: f64 = template
            .iter()
            .zip(observed)
            .map(|(p, q)| (transform.to_image_point(p) - q).norm_squared())
            .sum();
        let rms = (sum_sq / template.len() as f64).sqrt();
        if !rms.is_finite() {
            return Err(Error::NumericInstability("Non-finite alignment residual".to_string()));
        }
        if let Some(max_rms) = self.config.max_rms_residual {
            if rms > max_rms {
                return Err(Error::DegenerateAlignment(format!(
                    "RMS residual {rms:.3e} exceeds {max_rms:.3e}"
                )));
            }
        }
        transform.rms_residual = rms;

        log::trace!("Alignment fitted: rms residual {:.3e}, condition ratio {:.3e}", rms, ratio);

        Ok(transform)
    }
}

fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let sum: Vector3<f64> = points.iter().map(|p| p.coords).sum();
    Point3::from(sum / points.len() as f64)
}

/// Smallest over largest singular value; zero for the zero matrix
fn condition_ratio(matrix: &Matrix3<f64>) -> f64 {
    let singular_values = matrix.singular_values();
    let max = singular_values.max();
    if max <= 0.0 || !max.is_finite() {
        return 0.0;
    }
    singular_values.min() / max
}
