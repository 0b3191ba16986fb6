//! Per-eye gaze estimation from streams of 3D facial landmarks.
//!
//! The library turns detector output (MediaPipe Face Mesh layout with iris
//! refinement) into stable per-eye gaze vectors:
//! - Affine alignment of a generic face template to each frame's stable landmarks
//! - An incremental, guarded sphere fit of each eyeball in template space
//! - Gaze rays from the eyeball centre through the iris, mapped back into the frame
//!
//! Landmark detection, video capture and drawing stay outside the crate; they
//! plug in through [`session::LandmarkSource`], [`session::ResultSink`] and
//! [`visualization::LineSegment`].
//!
//! # Examples
//!
//! ## Processing Frames
//!
//! ```no_run
//! use gaze_estimation::{
//!     config::Config,
//!     face_model::FaceTemplate,
//!     session::GazeProcessor,
//!     synthetic::{SyntheticConfig, SyntheticFace},
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut processor = GazeProcessor::new(Config::default(), Arc::new(FaceTemplate::canonical()))?;
//! processor.start();
//!
//! for frame in SyntheticFace::canonical(SyntheticConfig::default())? {
//!     let result = processor.process_frame(&frame)?;
//!     if let Some(left) = result.left {
//!         println!("frame {}: left gaze {:?}", result.frame_index, left.direction);
//!     }
//! }
//! processor.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Background Session
//!
//! ```no_run
//! use gaze_estimation::{
//!     config::Config,
//!     face_model::FaceTemplate,
//!     session::spawn_session,
//!     synthetic::{SyntheticConfig, SyntheticFace},
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = SyntheticFace::canonical(SyntheticConfig::default())?;
//! let handle = spawn_session(Config::default(), Arc::new(FaceTemplate::canonical()), source)?;
//!
//! for result in handle.results().iter().take(100) {
//!     println!("{:?}", result.status);
//! }
//! handle.cancel();
//! let summary = handle.join()?;
//! println!("processed {} frames", summary.frames);
//! # Ok(())
//! # }
//! ```

/// Landmark index layout and per-frame landmark sets
pub mod landmarks;

/// Canonical face template and eyeball priors
pub mod face_model;

/// Template-to-frame affine alignment
pub mod alignment;

/// Incremental eyeball centre and radius estimation
pub mod eyeball;

/// Gaze ray computation
pub mod gaze;

/// Per-session frame orchestration
pub mod session;

/// Output geometry for downstream drawing
pub mod visualization;

/// Synthetic landmark streams with ground truth
pub mod synthetic;

/// Coordinate conversion helpers
pub mod utils;

/// Error types and result handling
pub mod error;

/// Constants used throughout the library
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
