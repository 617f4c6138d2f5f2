//! Numeric conversions between raster dimensions, pixel indices and world offsets.
//!
//! Raster dimensions are `usize`; geotransform arithmetic happens in `f64`.
//! Conversions from float to index are always range-checked since the float
//! may come from an arbitrary world coordinate.

use std::convert::TryFrom;

/// Convert a `usize` dimension to the `u32` the TIFF encoder expects.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}

/// Convert a `u32` TIFF dimension to `usize`.
#[inline]
#[must_use]
pub fn u32_to_usize(value: u32) -> usize {
    // u32 always fits on the 32/64-bit targets we build for
    value as usize
}

/// Convert a fractional pixel coordinate to an index, `None` if outside `0..max_value`.
///
/// NaN and negative inputs yield `None`.
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value.floor() as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Round a world-space span measured in pixels to the nearest whole pixel count.
///
/// Used when aligning grids that are assumed co-registered, so small float
/// error in origins must not shift a whole column.
#[inline]
#[must_use]
pub fn f64_to_pixel_offset(value: f64) -> isize {
    #[allow(clippy::cast_possible_truncation)]
    {
        value.round() as isize
    }
}

/// Convert a signed offset to unsigned, returning `None` if negative.
#[inline]
#[must_use]
pub fn isize_to_usize(value: isize) -> Option<usize> {
    usize::try_from(value).ok()
}
