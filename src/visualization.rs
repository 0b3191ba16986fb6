//! Rendering hints and drawable output geometry.
//!
//! Nothing here draws. A host overlay turns [`LineSegment`]s into pixels with
//! whatever graphics stack it has.

use crate::{
    constants::{DEFAULT_LENGTH_COEFFICIENT, DEFAULT_LINE_COLOR, DEFAULT_LINE_THICKNESS},
    utils::{normalized_to_pixel, safe_cast::u32_to_i32},
    Error, Result,
};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// How downstream visualization should draw gaze lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationOptions {
    /// Line colour as an RGB triple
    pub color: [u8; 3],

    /// Line thickness in pixels
    pub line_thickness: u32,

    /// Multiplier applied to the gaze vector to get the drawn line length
    pub length_coefficient: f64,
}

impl Default for VisualizationOptions {
    fn default() -> Self {
        Self {
            color: DEFAULT_LINE_COLOR,
            line_thickness: DEFAULT_LINE_THICKNESS,
            length_coefficient: DEFAULT_LENGTH_COEFFICIENT,
        }
    }
}

impl VisualizationOptions {
    /// Validate rendering hints
    ///
    /// # Errors
    ///
    /// Returns an error if the thickness is zero or too large, or the length
    /// coefficient is not a positive finite number
    pub fn validate(&self) -> Result<()> {
        if self.line_thickness == 0 {
            return Err(Error::ConfigError("Line thickness must be positive".to_string()));
        }
        u32_to_i32(self.line_thickness).map_err(|e| Error::ConfigError(e.to_string()))?;
        if !(self.length_coefficient.is_finite() && self.length_coefficient > 0.0) {
            return Err(Error::ConfigError("Length coefficient must be positive".to_string()));
        }
        Ok(())
    }
}

/// A pixel-space line ready to be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    /// Start pixel (x, y)
    pub start: (i32, i32),
    /// End pixel (x, y)
    pub end: (i32, i32),
    /// RGB colour
    pub color: [u8; 3],
    /// Thickness in pixels
    pub thickness: i32,
}

/// Line from `origin` along `direction × length_coefficient`, both in
/// normalized image coordinates, projected onto a `width × height` frame
///
/// Depth is dropped.
///
/// # Errors
///
/// Returns an error if the options are invalid or the geometry is not finite
pub fn project_line(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    options: &VisualizationOptions,
    width: u32,
    height: u32,
) -> Result<LineSegment> {
    options.validate()?;
    let end = origin + direction * options.length_coefficient;
    if !(origin.coords.iter().chain(end.coords.iter()).all(|c| c.is_finite())) {
        return Err(Error::NumericInstability("Gaze line is not finite".to_string()));
    }

    Ok(LineSegment {
        start: normalized_to_pixel(origin.x, origin.y, width, height),
        end: normalized_to_pixel(end.x, end.y, width, height),
        color: options.color,
        thickness: u32_to_i32(options.line_thickness)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = VisualizationOptions::default();
        assert_eq!(options.color, [0, 255, 0]);
        assert_eq!(options.line_thickness, 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_options() {
        let zero = VisualizationOptions {
            line_thickness: 0,
            ..VisualizationOptions::default()
        };
        assert!(zero.validate().is_err());

        let negative = VisualizationOptions {
            length_coefficient: -1.0,
            ..VisualizationOptions::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_project_line() {
        let origin = Point3::new(0.5, 0.5, -0.1);
        let direction = Vector3::new(0.011, -0.021, -0.05);
        let segment = project_line(&origin, &direction, &VisualizationOptions::default(), 640, 480).unwrap();

        assert_eq!(segment.start, (320, 240));
        assert_eq!(segment.end, (355, 189));
        assert_eq!(segment.thickness, 4);
        assert_eq!(segment.color, [0, 255, 0]);
    }

    #[test]
    fn test_project_line_non_finite() {
        let origin = Point3::new(0.5, f64::NAN, 0.0);
        let result = project_line(&origin, &Vector3::zeros(), &VisualizationOptions::default(), 640, 480);
        assert!(matches!(result, Err(Error::NumericInstability(_))));
    }
}
