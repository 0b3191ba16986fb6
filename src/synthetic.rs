//! Synthetic landmark stream with known ground truth.
//!
//! Stands in for the external landmark detector in tests, benches and the demo
//! binary. Each frame places the face template under a slowly moving head pose,
//! puts the eye-region landmarks on a pair of known eyeballs and the pupils
//! along a moving gaze direction, then adds Gaussian noise in model space.

use crate::{
    constants::DEFAULT_FRAME_INTERVAL_MS,
    face_model::FaceTemplate,
    landmarks::{Eye, LandmarkLayout, LandmarkSet},
    session::{Frame, LandmarkSource},
    Error, Result,
};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;

/// Eye-region landmarks placed on the iris ring; the rest go on the eyelid ring
const IRIS_RING_POINTS: usize = 4;

/// Angle between the gaze axis and the iris ring
const IRIS_RING_ANGLE: f64 = 0.3;

/// Angle between the forward axis and the eyelid ring
const EYELID_RING_ANGLE: f64 = 0.55;

/// Anisotropic scale from metres to normalized image coordinates
const IMAGE_SCALE: [f64; 3] = [2.2, 2.9, 2.2];

/// Radius of the simulated eyeballs
pub const TRUE_EYE_RADIUS: f64 = 0.021;

/// Synthetic stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    /// Number of frames to produce, `None` for an endless stream
    pub frames: Option<usize>,
    /// Standard deviation of the model-space landmark noise (metres)
    pub noise_std: f64,
    /// Probability that a frame has no detection
    pub drop_rate: f64,
    /// RNG seed
    pub seed: u64,
    /// Time between frames
    pub frame_interval_ms: u64,
    /// Move the head; when false the pose is fixed
    pub head_motion: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: Some(300),
            noise_std: 2e-4,
            drop_rate: 0.0,
            seed: 42,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            head_motion: true,
        }
    }
}

impl SyntheticConfig {
    /// Validate stream parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the noise or drop rate is out of range, or the frame
    /// interval is zero
    pub fn validate(&self) -> Result<()> {
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(Error::ConfigError("Noise standard deviation must be non-negative".to_string()));
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(Error::ConfigError("Drop rate must be in [0, 1)".to_string()));
        }
        if self.frame_interval_ms == 0 {
            return Err(Error::ConfigError("Frame interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// A simulated eyeball in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticEye {
    /// True centre
    pub center: Point3<f64>,
    /// True radius
    pub radius: f64,
}

/// Noise-free geometry of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTruth {
    /// Frame index
    pub frame_index: u64,
    /// Frame timestamp
    pub timestamp_ms: u64,
    /// Unit gaze direction shared by both eyes, model space
    pub gaze_model: Vector3<f64>,
    /// Linear part of the model → image map
    pub linear: Matrix3<f64>,
    /// Translation of the model → image map
    pub translation: Vector3<f64>,
}

impl FrameTruth {
    /// Map a model-space point into the frame
    #[must_use]
    pub fn to_image_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.linear * point.coords + self.translation)
    }

    /// True gaze direction in image space (unnormalized)
    #[must_use]
    pub fn image_direction(&self) -> Vector3<f64> {
        self.linear * self.gaze_model
    }
}

/// Generator of MediaPipe-layout landmark frames
#[derive(Debug, Clone)]
pub struct SyntheticFace {
    config: SyntheticConfig,
    template: FaceTemplate,
    layout: LandmarkLayout,
    left: SyntheticEye,
    right: SyntheticEye,
    rng: StdRng,
    noise: Normal<f64>,
    next_index: u64,
}

impl SyntheticFace {
    /// Stream for the canonical template and the default landmark layout
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn canonical(config: SyntheticConfig) -> Result<Self> {
        Self::new(config, FaceTemplate::canonical(), LandmarkLayout::default())
    }

    /// Stream for a given template and layout
    ///
    /// The true eyeballs sit a few millimetres off the template's priors.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the layout does not
    /// match the template
    pub fn new(config: SyntheticConfig, template: FaceTemplate, layout: LandmarkLayout) -> Result<Self> {
        config.validate()?;
        layout.validate()?;
        if layout.stable.len() != template.stable_points().len() {
            return Err(Error::ConfigError(
                "Layout and template disagree on the stable landmarks".to_string(),
            ));
        }
        let noise = Normal::new(0.0, config.noise_std).map_err(|e| Error::ConfigError(e.to_string()))?;

        let left = SyntheticEye {
            center: template.eye_prior(Eye::Left).center + Vector3::new(0.002, -0.0015, 0.003),
            radius: TRUE_EYE_RADIUS,
        };
        let right = SyntheticEye {
            center: template.eye_prior(Eye::Right).center + Vector3::new(-0.002, -0.0015, 0.003),
            radius: TRUE_EYE_RADIUS,
        };

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            template,
            layout,
            left,
            right,
            noise,
            next_index: 0,
        })
    }

    /// The simulated eyeball for one eye
    #[must_use]
    pub fn true_eye(&self, eye: Eye) -> &SyntheticEye {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    /// Ground truth for the given frame index
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Frame times stay far below 2^52 ms
    pub fn truth(&self, frame_index: u64) -> FrameTruth {
        let timestamp_ms = frame_index * self.config.frame_interval_ms;
        let t = timestamp_ms as f64 / 1000.0;

        let (roll, pitch, yaw) = if self.config.head_motion {
            (0.08 * (0.3 * t).sin(), 0.15 * (0.45 * t + 0.3).sin(), 0.25 * (0.7 * t).sin())
        } else {
            (0.02, 0.1, -0.05)
        };
        let rotation = Rotation3::from_euler_angles(roll, pitch, yaw);
        let scale = Matrix3::from_diagonal(&Vector3::from(IMAGE_SCALE));
        let translation = Vector3::new(0.5 + 0.05 * (0.2 * t).sin(), 0.5 + 0.03 * (0.25 * t).cos(), 0.0);

        let gaze_yaw = 0.35 * (1.3 * t + 0.5).sin();
        let gaze_pitch = 0.25 * (0.9 * t).sin();
        let gaze_model = Vector3::new(
            gaze_yaw.sin() * gaze_pitch.cos(),
            gaze_pitch.sin(),
            -gaze_yaw.cos() * gaze_pitch.cos(),
        );

        FrameTruth {
            frame_index,
            timestamp_ms,
            gaze_model,
            linear: scale * rotation.into_inner(),
            translation,
        }
    }

    fn jitter(&mut self, point: Point3<f64>) -> Point3<f64> {
        let offset = Vector3::new(
            self.noise.sample(&mut self.rng),
            self.noise.sample(&mut self.rng),
            self.noise.sample(&mut self.rng),
        );
        point + offset
    }

    #[allow(clippy::cast_precision_loss)]
    fn render(&mut self, truth: &FrameTruth) -> LandmarkSet {
        let mut landmarks = LandmarkSet::new(vec![
            truth.to_image_point(&Point3::origin());
            self.layout.required_len()
        ]);

        let stable: Vec<_> = self
            .layout
            .stable
            .iter()
            .copied()
            .zip(self.template.stable_points().iter().copied())
            .collect();
        for (idx, model) in stable {
            let noisy = self.jitter(model);
            landmarks.set(idx, truth.to_image_point(&noisy));
        }

        let phase = truth.frame_index as f64 * 0.37;
        for eye in [Eye::Left, Eye::Right] {
            let SyntheticEye { center, radius } = *self.true_eye(eye);
            let indices = self.layout.eye(eye).clone();
            let eyelid_count = indices.region.len().saturating_sub(IRIS_RING_POINTS).max(1);

            for (k, &idx) in indices.region.iter().enumerate() {
                let direction = if k < IRIS_RING_POINTS {
                    ring_direction(&truth.gaze_model, IRIS_RING_ANGLE, k as f64 * TAU / 4.0 + phase)
                } else {
                    let j = (k - IRIS_RING_POINTS) as f64;
                    ring_direction(
                        &-Vector3::z(),
                        EYELID_RING_ANGLE + 0.05 * (phase + j).sin(),
                        j * TAU / eyelid_count as f64 + 0.2 * phase.sin(),
                    )
                };
                let noisy = self.jitter(center + direction * radius);
                landmarks.set(idx, truth.to_image_point(&noisy));
            }

            let pupil = self.jitter(center + truth.gaze_model * radius);
            landmarks.set(indices.pupil, truth.to_image_point(&pupil));
        }

        landmarks
    }
}

/// Unit vector at `angle` from `axis`, rotated by `azimuth` around it
fn ring_direction(axis: &Vector3<f64>, angle: f64, azimuth: f64) -> Vector3<f64> {
    let axis = axis.normalize();
    let helper = if axis.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let u = axis.cross(&helper).normalize();
    let v = axis.cross(&u);
    axis * angle.cos() + (u * azimuth.cos() + v * azimuth.sin()) * angle.sin()
}

impl Iterator for SyntheticFace {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(limit) = self.config.frames {
            if self.next_index >= limit as u64 {
                return None;
            }
        }
        let truth = self.truth(self.next_index);
        self.next_index += 1;

        let landmarks = if self.config.drop_rate > 0.0 && self.rng.gen_bool(self.config.drop_rate) {
            None
        } else {
            Some(self.render(&truth))
        };

        Some(Frame {
            timestamp_ms: truth.timestamp_ms,
            landmarks,
        })
    }
}

impl LandmarkSource for SyntheticFace {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignmentEstimator;
    use approx::assert_relative_eq;

    fn noiseless() -> SyntheticConfig {
        SyntheticConfig {
            frames: Some(5),
            noise_std: 0.0,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_frame_count_and_timestamps() {
        let frames: Vec<_> = SyntheticFace::canonical(noiseless()).unwrap().collect();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[3].timestamp_ms, 3 * DEFAULT_FRAME_INTERVAL_MS);
        assert!(frames.iter().all(|f| f.landmarks.is_some()));
    }

    #[test]
    fn test_eye_points_lie_on_true_sphere() {
        let mut face = SyntheticFace::canonical(noiseless()).unwrap();
        let truth = face.truth(0);
        let landmarks = face.next().unwrap().landmarks.unwrap();
        let layout = LandmarkLayout::default();
        let eye = *face.true_eye(Eye::Left);

        let inverse = truth.linear.try_inverse().unwrap();
        for &idx in layout.left_eye.region.iter().chain([&layout.left_eye.pupil]) {
            let image = landmarks.points()[idx];
            let model = Point3::from(inverse * (image.coords - truth.translation));
            assert_relative_eq!((model - eye.center).norm(), eye.radius, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_alignment_recovers_pose() {
        let mut face = SyntheticFace::canonical(noiseless()).unwrap();
        let truth = face.truth(0);
        let landmarks = face.next().unwrap().landmarks.unwrap();

        let transform = AlignmentEstimator::default()
            .align(&FaceTemplate::canonical(), &landmarks, &LandmarkLayout::default())
            .unwrap();
        assert_relative_eq!(transform.linear(), truth.linear, epsilon = 1e-9);
        assert_relative_eq!(transform.translation(), truth.translation, epsilon = 1e-9);
    }

    #[test]
    fn test_drop_rate_produces_empty_frames() {
        let config = SyntheticConfig {
            frames: Some(200),
            drop_rate: 0.5,
            ..SyntheticConfig::default()
        };
        let dropped = SyntheticFace::canonical(config)
            .unwrap()
            .filter(|f| f.landmarks.is_none())
            .count();
        assert!(dropped > 50 && dropped < 150);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let a: Vec<_> = SyntheticFace::canonical(SyntheticConfig::default()).unwrap().take(3).collect();
        let b: Vec<_> = SyntheticFace::canonical(SyntheticConfig::default()).unwrap().take(3).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config() {
        let config = SyntheticConfig {
            drop_rate: 1.0,
            ..SyntheticConfig::default()
        };
        assert!(SyntheticFace::canonical(config).is_err());
    }
}
