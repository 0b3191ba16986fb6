//! Facial landmark layout and per-frame landmark sets.
//!
//! Indices follow the MediaPipe Face Mesh topology with iris refinement
//! (478 points). Coordinates are normalized: x and y are fractions of the image
//! width and height, z is relative depth on roughly the same scale as x.

use crate::{constants::MEDIAPIPE_LANDMARK_COUNT, Error, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Left and right outer head points (near the ears)
pub const OUTER_HEAD_POINTS: [usize; 2] = [162, 389];
/// Nose bridge between the eyes
pub const NOSE_BRIDGE: usize = 6;
/// Nose tip
pub const NOSE_TIP: usize = 4;

/// Iris ring around the left pupil
pub const LEFT_IRIS: [usize; 4] = [469, 470, 471, 472];
/// Left iris centre
pub const LEFT_PUPIL: usize = 468;

/// Iris ring around the right pupil
pub const RIGHT_IRIS: [usize; 4] = [474, 475, 476, 477];
/// Right iris centre
pub const RIGHT_PUPIL: usize = 473;

/// Inner eye corners (left, right)
pub const INTERNAL_EYES_CORNERS: [usize; 2] = [155, 362];
/// Outer eye corners (left, right)
pub const OUTER_EYES_CORNERS: [usize; 2] = [33, 263];

/// Eyelid points bordering the left eyeball
pub const ADJACENT_LEFT_EYELID_PART: [usize; 7] = [160, 159, 158, 163, 144, 145, 153];
/// Eyelid points bordering the right eyeball
pub const ADJACENT_RIGHT_EYELID_PART: [usize; 7] = [387, 386, 385, 390, 373, 374, 380];

/// Stable landmarks used for alignment, in face template order
pub const BASE_LANDMARKS: [usize; 8] = [
    INTERNAL_EYES_CORNERS[0],
    INTERNAL_EYES_CORNERS[1],
    OUTER_EYES_CORNERS[0],
    OUTER_EYES_CORNERS[1],
    OUTER_HEAD_POINTS[0],
    OUTER_HEAD_POINTS[1],
    NOSE_BRIDGE,
    NOSE_TIP,
];

/// Eye identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    /// Subject's left eye
    Left,
    /// Subject's right eye
    Right,
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Landmark indices describing one eye
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeLandmarks {
    /// Points sampled around the eye socket (iris ring and adjacent eyelid)
    pub region: Vec<usize>,
    /// Iris centre
    pub pupil: usize,
}

impl EyeLandmarks {
    /// Default MediaPipe indices for the given eye
    #[must_use]
    pub fn mediapipe(eye: Eye) -> Self {
        let (iris, eyelid, pupil) = match eye {
            Eye::Left => (LEFT_IRIS, ADJACENT_LEFT_EYELID_PART, LEFT_PUPIL),
            Eye::Right => (RIGHT_IRIS, ADJACENT_RIGHT_EYELID_PART, RIGHT_PUPIL),
        };
        Self {
            region: iris.iter().chain(eyelid.iter()).copied().collect(),
            pupil,
        }
    }
}

/// Fixed landmark index subsets used by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkLayout {
    /// Stable landmarks for alignment; order must match the face template
    pub stable: Vec<usize>,
    /// Left eye indices
    pub left_eye: EyeLandmarks,
    /// Right eye indices
    pub right_eye: EyeLandmarks,
}

impl Default for LandmarkLayout {
    fn default() -> Self {
        Self {
            stable: BASE_LANDMARKS.to_vec(),
            left_eye: EyeLandmarks::mediapipe(Eye::Left),
            right_eye: EyeLandmarks::mediapipe(Eye::Right),
        }
    }
}

impl LandmarkLayout {
    /// Indices for one eye
    #[must_use]
    pub fn eye(&self, eye: Eye) -> &EyeLandmarks {
        match eye {
            Eye::Left => &self.left_eye,
            Eye::Right => &self.right_eye,
        }
    }

    /// Smallest landmark count a set must have to satisfy this layout
    #[must_use]
    pub fn required_len(&self) -> usize {
        self.indices().max().map_or(0, |max| max + 1)
    }

    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.stable
            .iter()
            .chain(self.left_eye.region.iter())
            .chain(self.right_eye.region.iter())
            .copied()
            .chain([self.left_eye.pupil, self.right_eye.pupil])
    }

    /// Check that a landmark set can be consumed by this layout
    ///
    /// Only the stable subset has to be finite here: a bad eye landmark spoils
    /// that eye alone and is caught by its estimator or gaze stage.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The set is shorter than the largest index used
    /// - A stable landmark has a non-finite coordinate
    pub fn check(&self, landmarks: &LandmarkSet) -> Result<()> {
        let required = self.required_len();
        if landmarks.len() < required {
            return Err(Error::InvalidInput(format!(
                "Expected at least {} landmarks, got {}",
                required,
                landmarks.len()
            )));
        }

        if let Some(&idx) = self.stable.iter().find(|&&idx| !is_finite_point(&landmarks.points[idx])) {
            return Err(Error::NumericInstability(format!(
                "Landmark {idx} has a non-finite coordinate"
            )));
        }

        Ok(())
    }

    /// Validate the layout itself
    ///
    /// # Errors
    ///
    /// Returns an error if an index subset is empty
    pub fn validate(&self) -> Result<()> {
        if self.stable.is_empty() {
            return Err(Error::ConfigError("Stable landmark subset is empty".to_string()));
        }
        if self.left_eye.region.is_empty() || self.right_eye.region.is_empty() {
            return Err(Error::ConfigError("Eye region landmark subset is empty".to_string()));
        }
        Ok(())
    }
}

/// One frame's detected landmarks
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point3<f64>>,
}

impl LandmarkSet {
    /// Wrap detector output
    #[must_use]
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Build from raw `[x, y, z]` triples
    #[must_use]
    pub fn from_coords(coords: &[[f64; 3]]) -> Self {
        Self {
            points: coords.iter().map(|&[x, y, z]| Point3::new(x, y, z)).collect(),
        }
    }

    /// An all-zero set with the MediaPipe landmark count
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            points: vec![Point3::origin(); MEDIAPIPE_LANDMARK_COUNT],
        }
    }

    /// Number of landmarks
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no landmarks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark at `idx`
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Point3<f64>> {
        self.points.get(idx)
    }

    /// All landmarks in index order
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Landmarks at the given indices, in order
    ///
    /// # Errors
    ///
    /// Returns an error if an index is out of range
    pub fn select(&self, indices: &[usize]) -> Result<Vec<Point3<f64>>> {
        indices
            .iter()
            .map(|&idx| {
                self.points.get(idx).copied().ok_or_else(|| {
                    Error::InvalidInput(format!("Landmark index {idx} out of range ({})", self.points.len()))
                })
            })
            .collect()
    }

    /// Landmark at `idx`, or an error when the set is too short
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range
    pub fn point(&self, idx: usize) -> Result<Point3<f64>> {
        self.points
            .get(idx)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("Landmark index {idx} out of range ({})", self.points.len())))
    }

    pub(crate) fn set(&mut self, idx: usize, point: Point3<f64>) {
        if let Some(slot) = self.points.get_mut(idx) {
            *slot = point;
        }
    }
}

/// Whether every coordinate of the point is finite
#[must_use]
pub fn is_finite_point(point: &Point3<f64>) -> bool {
    point.coords.iter().all(|c| c.is_finite())
}
