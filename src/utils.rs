//! Coordinate helpers shared by the output geometry.

pub mod safe_cast;

use safe_cast::f64_to_i32_clamp;

/// Convert a normalized landmark coordinate to integer pixel coordinates
///
/// Truncates towards zero like the integer cast of a scaled float. Values
/// outside the frame are kept (a gaze line may leave the image) but saturated
/// to the `i32` range.
#[must_use]
pub fn normalized_to_pixel(x: f64, y: f64, width: u32, height: u32) -> (i32, i32) {
    (
        f64_to_i32_clamp(x * f64::from(width), i32::MIN, i32::MAX),
        f64_to_i32_clamp(y * f64::from(height), i32::MIN, i32::MAX),
    )
}
