//! Checked and saturating numeric casts for pixel output

use crate::{Error, Result};

/// Safely convert u32 to i32 with overflow checking
///
/// # Errors
///
/// Returns an error if the value exceeds i32::MAX
pub fn u32_to_i32(value: u32) -> Result<i32> {
    value
        .try_into()
        .map_err(|_| Error::InvalidInput(format!("Value {value} too large to fit in i32")))
}

/// Clamp and convert f64 to i32 for pixel coordinates
///
/// NaN maps to `min`, infinities saturate.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Clamping ensures safe truncation
pub fn f64_to_i32_clamp(value: f64, min: i32, max: i32) -> i32 {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };

    if value.is_nan() {
        return min;
    }

    let clamped = value.clamp(f64::from(min), f64::from(max));
    (clamped as i32).clamp(min, max)
}
