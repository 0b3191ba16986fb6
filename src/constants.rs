//! Constants used throughout the library

/// Number of landmarks produced by MediaPipe Face Mesh with iris refinement
pub const MEDIAPIPE_LANDMARK_COUNT: usize = 478;

/// Minimum point correspondences for a 3D affine fit (12 degrees of freedom)
pub const MIN_CORRESPONDENCES: usize = 4;

/// Minimum points for an algebraic sphere fit (4 unknowns)
pub const MIN_SPHERE_POINTS: usize = 4;

/// Singular value ratio below which a configuration is treated as rank-deficient
pub const RANK_TOLERANCE: f64 = 1e-12;

/// Default singular value ratio below which an alignment is rejected as degenerate
pub const DEFAULT_ALIGNMENT_CONDITION_RATIO: f64 = 1e-6;

/// Default singular value ratio guarding the sphere fit normal equations
pub const DEFAULT_SPHERE_CONDITION_RATIO: f64 = 1e-12;

/// Default eyeball radius prior in template units (metres)
pub const DEFAULT_EYE_RADIUS: f64 = 0.02;

/// Plausible eyeball radius range in template units
pub const DEFAULT_RADIUS_BOUNDS: (f64, f64) = (0.015, 0.025);

/// Points accumulated before the first sphere fit is attempted
pub const DEFAULT_MIN_POINTS: usize = 300;

/// Most recent points an eyeball fit is computed from
pub const DEFAULT_HISTORY_SIZE: usize = 400;

/// Confidence at which an eyeball centre counts as detected
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.995;

/// Confidence at which the search stops refining
pub const DEFAULT_REASONABLE_CONFIDENCE: f64 = 0.997;

/// Refinements required before an estimate is exposed
pub const DEFAULT_MIN_ACCEPTED_UPDATES: usize = 1;

/// Time without improvement after which a completed search resumes
pub const DEFAULT_REFRESH_TIME_MS: u64 = 10_000;

/// Frame residual multiple (of the current fit residual) treated as an outlier frame
pub const DEFAULT_OUTLIER_RATIO: f64 = 4.0;

/// Lower bound on the residual used by the outlier gate, in template units
pub const DEFAULT_RESIDUAL_FLOOR: f64 = 5e-4;

/// Default gaze line colour (RGB, green)
pub const DEFAULT_LINE_COLOR: [u8; 3] = [0, 255, 0];

/// Default gaze line thickness in pixels
pub const DEFAULT_LINE_THICKNESS: u32 = 4;

/// Default multiplier applied to the gaze vector when drawing
pub const DEFAULT_LENGTH_COEFFICIENT: f64 = 5.0;

/// Results a spawned session may queue ahead of its consumer
pub const DEFAULT_RESULT_CAPACITY: usize = 64;

/// Frame interval assumed by the synthetic source (about 30 FPS)
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;
