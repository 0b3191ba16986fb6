//! Gaze vector computation from a converged eyeball and the current frame.

use crate::{
    alignment::AlignmentTransform,
    eyeball::EyeballEstimate,
    landmarks::is_finite_point,
    visualization::{project_line, LineSegment, VisualizationOptions},
    Error, Result,
};
use nalgebra::{Point3, Vector3};

/// Per-eye gaze output for one frame, in image space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeRay {
    /// Iris centre landmark
    pub origin: Point3<f64>,
    /// Eyeball centre → iris direction
    pub direction: Vector3<f64>,
    /// Eyeball centre mapped into the frame
    pub eyeball_center: Point3<f64>,
}

impl GazeRay {
    /// Direction scaled to unit length, `None` for a zero vector
    #[must_use]
    pub fn unit_direction(&self) -> Option<Vector3<f64>> {
        self.direction.try_normalize(f64::EPSILON)
    }

    /// Pixel line for drawing this ray on a `width × height` frame
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the ray is not finite
    pub fn line_segment(&self, options: &VisualizationOptions, width: u32, height: u32) -> Result<LineSegment> {
        project_line(&self.origin, &self.direction, options, width, height)
    }
}

/// Compute one eye's gaze ray
///
/// The iris is pulled back into model space, the direction is taken from the
/// eyeball centre there, and only the linear part of the transform carries it
/// into the frame.
///
/// # Errors
///
/// Returns `NumericInstability` if the iris or any result is not finite
pub fn compute_gaze(
    eyeball: &EyeballEstimate,
    iris: &Point3<f64>,
    transform: &AlignmentTransform,
) -> Result<GazeRay> {
    if !is_finite_point(iris) {
        return Err(Error::NumericInstability("Iris landmark is not finite".to_string()));
    }

    let iris_model = transform.to_model_point(iris);
    let direction_model = iris_model - eyeball.center;
    let direction = transform.to_image_vector(&direction_model);
    let eyeball_center = transform.to_image_point(&eyeball.center);

    if !(direction.iter().all(|c| c.is_finite()) && is_finite_point(&eyeball_center)) {
        return Err(Error::NumericInstability("Gaze vector is not finite".to_string()));
    }

    log::trace!(
        "Gaze direction ({:.4}, {:.4}, {:.4})",
        direction.x,
        direction.y,
        direction.z
    );

    Ok(GazeRay {
        origin: *iris,
        direction,
        eyeball_center,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn transform() -> AlignmentTransform {
        let linear = Matrix3::new(2.0, 0.1, 0.0, -0.2, 2.5, 0.05, 0.0, 0.1, 2.0);
        AlignmentTransform::from_parts(linear, Vector3::new(0.5, 0.4, -0.1)).unwrap()
    }

    fn eyeball() -> EyeballEstimate {
        EyeballEstimate {
            center: Point3::new(-0.06, -0.06, 0.02),
            radius: 0.02,
            confidence: 0.999,
        }
    }

    #[test]
    fn test_gaze_points_from_centre_to_iris() {
        let t = transform();
        let iris_model = Point3::new(-0.055, -0.058, 0.001);
        let iris = t.to_image_point(&iris_model);

        let ray = compute_gaze(&eyeball(), &iris, &t).unwrap();

        assert_relative_eq!(ray.origin, iris);
        assert_relative_eq!(ray.eyeball_center + ray.direction, iris, epsilon = 1e-12);
        assert_relative_eq!(ray.direction, t.linear() * (iris_model - eyeball().center), epsilon = 1e-12);
    }

    #[test]
    fn test_translation_does_not_affect_direction() {
        let linear = transform().linear();
        let a = AlignmentTransform::from_parts(linear, Vector3::zeros()).unwrap();
        let b = AlignmentTransform::from_parts(linear, Vector3::new(3.0, -1.0, 2.0)).unwrap();
        let iris_model = Point3::new(-0.05, -0.06, 0.0);

        let ray_a = compute_gaze(&eyeball(), &a.to_image_point(&iris_model), &a).unwrap();
        let ray_b = compute_gaze(&eyeball(), &b.to_image_point(&iris_model), &b).unwrap();
        assert_relative_eq!(ray_a.direction, ray_b.direction, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_iris() {
        let iris = Point3::new(f64::NAN, 0.0, 0.0);
        assert!(matches!(
            compute_gaze(&eyeball(), &iris, &transform()),
            Err(Error::NumericInstability(_))
        ));
    }

    #[test]
    fn test_unit_direction() {
        let ray = GazeRay {
            origin: Point3::origin(),
            direction: Vector3::new(0.0, 3.0, -4.0),
            eyeball_center: Point3::origin(),
        };
        assert_relative_eq!(ray.unit_direction().unwrap(), Vector3::new(0.0, 0.6, -0.8));

        let zero = GazeRay {
            direction: Vector3::zeros(),
            ..ray
        };
        assert!(zero.unit_direction().is_none());
    }
}
