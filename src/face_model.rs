//! Canonical 3D face template used as the model coordinate space.
//!
//! Units are metres. The template origin sits roughly between the eyes, x grows
//! towards the subject's left, y grows downwards and negative z points out of
//! the face towards the camera.

use crate::{
    constants::{DEFAULT_EYE_RADIUS, MIN_CORRESPONDENCES},
    landmarks::Eye,
    Error, Result,
};
use nalgebra::Point3;

/// Inner eye corners (left, right)
pub const INTERNAL_EYES_CORNERS_MODEL: [[f64; 3]; 2] = [[-0.035, -0.05, 0.0], [0.035, -0.05, 0.0]];

/// Outer eye corners (left, right)
pub const OUTER_EYES_CORNERS_MODEL: [[f64; 3]; 2] = [[-0.09, -0.057, 0.01], [0.09, -0.057, 0.01]];

/// Outer head points (left, right)
pub const OUTER_HEAD_POINTS_MODEL: [[f64; 3]; 2] = [[-0.145, -0.1, 0.1], [0.145, -0.1, 0.1]];

/// Nose bridge
pub const NOSE_BRIDGE_MODEL: [f64; 3] = [0.0, -0.0319, -0.0432];

/// Nose tip
pub const NOSE_TIP_MODEL: [f64; 3] = [0.0, 0.088, -0.071];

/// Vertical offset of the eyeball centre prior below the eye corner midpoint
const EYE_CENTER_Y_OFFSET: f64 = -0.009;

/// Depth of the eyeball centre prior
const EYE_CENTER_DEPTH: f64 = 0.02;

/// Initial guess for one eyeball in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePrior {
    /// Eyeball centre
    pub center: Point3<f64>,
    /// Eyeball radius
    pub radius: f64,
}

/// Static face geometry shared read-only across sessions
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTemplate {
    stable_points: Vec<Point3<f64>>,
    left_eye: EyePrior,
    right_eye: EyePrior,
}

impl FaceTemplate {
    /// Create a template from stable points (in layout order) and eye priors
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Fewer than four stable points are given
    /// - A point or prior is not finite, or a prior radius is not positive
    pub fn new(stable_points: Vec<Point3<f64>>, left_eye: EyePrior, right_eye: EyePrior) -> Result<Self> {
        if stable_points.len() < MIN_CORRESPONDENCES {
            return Err(Error::ConfigError(format!(
                "Face template needs at least {} stable points, got {}",
                MIN_CORRESPONDENCES,
                stable_points.len()
            )));
        }
        let all_finite = stable_points
            .iter()
            .chain([&left_eye.center, &right_eye.center])
            .all(|p| p.coords.iter().all(|c| c.is_finite()));
        if !all_finite {
            return Err(Error::ConfigError("Face template contains non-finite values".to_string()));
        }
        for prior in [&left_eye, &right_eye] {
            if !(prior.radius.is_finite() && prior.radius > 0.0) {
                return Err(Error::ConfigError(format!(
                    "Eye radius prior must be positive, got {}",
                    prior.radius
                )));
            }
        }

        Ok(Self {
            stable_points,
            left_eye,
            right_eye,
        })
    }

    /// The generic face model matching the default MediaPipe layout
    #[must_use]
    pub fn canonical() -> Self {
        let to_point = |[x, y, z]: [f64; 3]| Point3::new(x, y, z);

        let stable_points = vec![
            to_point(INTERNAL_EYES_CORNERS_MODEL[0]),
            to_point(INTERNAL_EYES_CORNERS_MODEL[1]),
            to_point(OUTER_EYES_CORNERS_MODEL[0]),
            to_point(OUTER_EYES_CORNERS_MODEL[1]),
            to_point(OUTER_HEAD_POINTS_MODEL[0]),
            to_point(OUTER_HEAD_POINTS_MODEL[1]),
            to_point(NOSE_BRIDGE_MODEL),
            to_point(NOSE_TIP_MODEL),
        ];

        Self {
            stable_points,
            left_eye: Self::default_eye_prior(0),
            right_eye: Self::default_eye_prior(1),
        }
    }

    fn default_eye_prior(side: usize) -> EyePrior {
        let inner = INTERNAL_EYES_CORNERS_MODEL[side];
        let outer = OUTER_EYES_CORNERS_MODEL[side];
        EyePrior {
            center: Point3::new(
                (inner[0] + outer[0]) * 0.5,
                (inner[1] + outer[1]) * 0.5 + EYE_CENTER_Y_OFFSET,
                EYE_CENTER_DEPTH,
            ),
            radius: DEFAULT_EYE_RADIUS,
        }
    }

    /// Stable points in layout order
    #[must_use]
    pub fn stable_points(&self) -> &[Point3<f64>] {
        &self.stable_points
    }

    /// Prior for one eye
    #[must_use]
    pub fn eye_prior(&self, eye: Eye) -> &EyePrior {
        match eye {
            Eye::Left => &self.left_eye,
            Eye::Right => &self.right_eye,
        }
    }
}

impl Default for FaceTemplate {
    fn default() -> Self {
        Self::canonical()
    }
}
