//! Configuration management for the gaze estimation pipeline

use crate::{
    constants::{
        DEFAULT_ALIGNMENT_CONDITION_RATIO, DEFAULT_HISTORY_SIZE, DEFAULT_MIN_ACCEPTED_UPDATES, DEFAULT_MIN_CONFIDENCE,
        DEFAULT_MIN_POINTS, DEFAULT_OUTLIER_RATIO, DEFAULT_RADIUS_BOUNDS, DEFAULT_REASONABLE_CONFIDENCE,
        DEFAULT_REFRESH_TIME_MS, DEFAULT_RESIDUAL_FLOOR, DEFAULT_RESULT_CAPACITY, DEFAULT_SPHERE_CONDITION_RATIO,
        MIN_SPHERE_POINTS, RANK_TOLERANCE,
    },
    landmarks::LandmarkLayout,
    visualization::VisualizationOptions,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline configuration, passed to the frame orchestrator at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Landmark index subsets
    pub landmarks: LandmarkLayout,

    /// Alignment estimator tolerances
    pub alignment: AlignmentConfig,

    /// Eyeball estimator parameters (shared by both eyes)
    pub eyeball: EyeballConfig,

    /// Rendering hints for downstream visualization
    pub visualization: VisualizationOptions,

    /// Session behaviour
    pub session: SessionConfig,
}

/// Alignment estimator tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Smallest accepted singular value ratio of the template scatter and the fitted linear part
    pub min_condition_ratio: f64,

    /// Singular value ratio below which the template subset is rank-deficient
    pub rank_tolerance: f64,

    /// Optional upper bound on the RMS fit residual (observed units)
    pub max_rms_residual: Option<f64>,
}

/// Eyeball estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeballConfig {
    /// Points accumulated before the first sphere fit
    pub min_points: usize,

    /// Most recent points the fit is computed from; older frames age out
    pub history_size: usize,

    /// Confidence at which the centre counts as detected
    pub min_confidence: f64,

    /// Confidence at which refinement stops
    pub reasonable_confidence: f64,

    /// Refinements required before the estimate is exposed
    pub min_accepted_updates: usize,

    /// Plausible radius range (min, max) in template units
    pub radius_bounds: (f64, f64),

    /// Time without improvement after which a completed search resumes
    pub refresh_time_ms: u64,

    /// Frame residual multiple of the current fit residual treated as an outlier frame
    pub outlier_ratio: f64,

    /// Lower bound on the residual used by the outlier gate
    pub residual_floor: f64,

    /// Smallest accepted singular value ratio of the sphere fit normal equations
    pub min_condition_ratio: f64,
}

/// Session behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deliver results for frames without any gaze vector ("no result" notifications)
    pub emit_empty_results: bool,

    /// Results a spawned session may queue before it waits for the consumer
    pub result_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            landmarks: LandmarkLayout::default(),
            alignment: AlignmentConfig::default(),
            eyeball: EyeballConfig::default(),
            visualization: VisualizationOptions::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            min_condition_ratio: DEFAULT_ALIGNMENT_CONDITION_RATIO,
            rank_tolerance: RANK_TOLERANCE,
            max_rms_residual: None,
        }
    }
}

impl Default for EyeballConfig {
    fn default() -> Self {
        Self {
            min_points: DEFAULT_MIN_POINTS,
            history_size: DEFAULT_HISTORY_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            reasonable_confidence: DEFAULT_REASONABLE_CONFIDENCE,
            min_accepted_updates: DEFAULT_MIN_ACCEPTED_UPDATES,
            radius_bounds: DEFAULT_RADIUS_BOUNDS,
            refresh_time_ms: DEFAULT_REFRESH_TIME_MS,
            outlier_ratio: DEFAULT_OUTLIER_RATIO,
            residual_floor: DEFAULT_RESIDUAL_FLOOR,
            min_condition_ratio: DEFAULT_SPHERE_CONDITION_RATIO,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            emit_empty_results: true,
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}

impl AlignmentConfig {
    /// Validate alignment tolerances
    ///
    /// # Errors
    ///
    /// Returns an error if a tolerance is out of range
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.rank_tolerance) {
            return Err(Error::ConfigError("Rank tolerance must be in [0, 1)".to_string()));
        }
        if !(self.rank_tolerance..1.0).contains(&self.min_condition_ratio) {
            return Err(Error::ConfigError(
                "Alignment condition ratio must be in [rank_tolerance, 1)".to_string(),
            ));
        }
        if let Some(max_rms) = self.max_rms_residual {
            if !(max_rms.is_finite() && max_rms > 0.0) {
                return Err(Error::ConfigError("Maximum RMS residual must be positive".to_string()));
            }
        }
        Ok(())
    }
}

impl EyeballConfig {
    /// Validate eyeball estimator parameters
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is out of range
    pub fn validate(&self) -> Result<()> {
        if self.min_points < MIN_SPHERE_POINTS {
            return Err(Error::ConfigError(format!(
                "Eyeball min_points must be at least {MIN_SPHERE_POINTS}"
            )));
        }
        if self.history_size < self.min_points {
            return Err(Error::ConfigError(format!(
                "Eyeball history_size ({}) must be at least min_points ({})",
                self.history_size, self.min_points
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::ConfigError("Minimum confidence must be between 0.0 and 1.0".to_string()));
        }
        if !(self.min_confidence..=1.0).contains(&self.reasonable_confidence) {
            return Err(Error::ConfigError(
                "Reasonable confidence must be between min_confidence and 1.0".to_string(),
            ));
        }
        let (min_radius, max_radius) = self.radius_bounds;
        if !(min_radius.is_finite() && max_radius.is_finite() && 0.0 < min_radius && min_radius < max_radius) {
            return Err(Error::ConfigError(format!(
                "Radius bounds must satisfy 0 < min < max, got ({min_radius}, {max_radius})"
            )));
        }
        if self.outlier_ratio.is_nan() || self.outlier_ratio <= 0.0 {
            return Err(Error::ConfigError("Outlier ratio must be positive".to_string()));
        }
        if !(self.residual_floor.is_finite() && self.residual_floor >= 0.0) {
            return Err(Error::ConfigError("Residual floor must be non-negative".to_string()));
        }
        if !(0.0..1.0).contains(&self.min_condition_ratio) {
            return Err(Error::ConfigError("Sphere condition ratio must be in [0, 1)".to_string()));
        }
        Ok(())
    }
}

impl SessionConfig {
    /// Validate session behaviour
    ///
    /// # Errors
    ///
    /// Returns an error if the result capacity is zero
    pub fn validate(&self) -> Result<()> {
        if self.result_capacity == 0 {
            return Err(Error::ConfigError("Result capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        self.landmarks.validate()?;
        self.alignment.validate()?;
        self.eyeball.validate()?;
        self.visualization.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Gaze Estimation Configuration

# Landmark indices (MediaPipe Face Mesh with iris refinement)
landmarks:
  stable: [155, 362, 33, 263, 162, 389, 6, 4]
  left_eye:
    region: [469, 470, 471, 472, 160, 159, 158, 163, 144, 145, 153]
    pupil: 468
  right_eye:
    region: [474, 475, 476, 477, 387, 386, 385, 390, 373, 374, 380]
    pupil: 473

# Alignment estimator
alignment:
  min_condition_ratio: 1.0e-6
  rank_tolerance: 1.0e-12
  max_rms_residual: null

# Eyeball estimator
eyeball:
  min_points: 300
  history_size: 400
  min_confidence: 0.995
  reasonable_confidence: 0.997
  min_accepted_updates: 1
  radius_bounds: [0.015, 0.025]
  refresh_time_ms: 10000
  outlier_ratio: 4.0
  residual_floor: 0.0005
  min_condition_ratio: 1.0e-12

# Gaze line rendering hints
visualization:
  color: [0, 255, 0]
  line_thickness: 4
  length_coefficient: 5.0

# Session behaviour
session:
  emit_empty_results: true
  result_capacity: 64
"#;
