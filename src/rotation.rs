//! Sensor rotation handling.
//!
//! Imaging cameras are mounted at arbitrary quarter-turn rotations relative
//! to the operator's view, but always report centroids in their own unrotated
//! frame. Displaying a beam position therefore needs two corrections, fixed
//! once per binding:
//!
//! 1. **Axis selection**: which native sensor axis feeds the display's
//!    x axis (swapped at 90°/270°).
//! 2. **Reflection**: rotating the image also moves the origin corner, so
//!    all rotations except 0° reflect one or both axes about the sensor's
//!    own extent.
//!
//! [`resolve`] computes both as a [`RotationBinding`] value object; the
//! binding then maps raw centroids into canonical display coordinates with
//! [`RotationBinding::apply`].
//!
//! Centroid values of exactly `0.0` are passed through unmodified: an
//! uninitialized signal reads zero, and reflecting it would jump the display
//! to the far sensor edge before any data arrived.

use serde::{Deserialize, Serialize};

use crate::error::{AlignError, AppResult};

/// Which native sensor axis supplies the canonical x centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentroidAxis {
    /// The sensor's own x centroid feeds canonical x.
    NativeX,
    /// The sensor's y centroid feeds canonical x (90°/270° mounts).
    NativeY,
}

/// Per-binding transform parameters from sensor frame to display frame.
///
/// Computed once per bind from the sensor's array dimensions and the mount
/// rotation; applied to every centroid tick afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationBinding {
    /// True when canonical x is fed by the sensor's native y axis.
    pub swapped: bool,
    /// Canonical image extent along x, pixels.
    pub x_size: u32,
    /// Canonical image extent along y, pixels.
    pub y_size: u32,
    /// Reflection offset for x: displayed x = `mod_x - cx` for nonzero cx.
    pub mod_x: Option<f64>,
    /// Reflection offset for y, same rule as `mod_x`.
    pub mod_y: Option<f64>,
}

/// Compute the transform parameters for a sensor mounted at `rotation`
/// degrees, with raw (unrotated) dimensions `raw_size_x` x `raw_size_y`.
///
/// Any rotation value is accepted; only the mod-360 normalization is used.
/// Zero-pixel dimensions are rejected with [`AlignError::Configuration`].
pub fn resolve(rotation: f64, raw_size_x: u32, raw_size_y: u32) -> AppResult<RotationBinding> {
    if raw_size_x == 0 || raw_size_y == 0 {
        return Err(AlignError::Configuration(format!(
            "invalid sensor geometry {raw_size_x}x{raw_size_y} at rotation {rotation}"
        )));
    }
    let rotation = rotation.rem_euclid(360.0);
    let swapped = rotation.rem_euclid(180.0) != 0.0;
    let (x_size, y_size) = if swapped {
        (raw_size_y, raw_size_x)
    } else {
        (raw_size_x, raw_size_y)
    };
    let (mod_x, mod_y) = if rotation == 0.0 {
        (None, None)
    } else if rotation == 90.0 {
        (Some(f64::from(x_size)), None)
    } else if rotation == 180.0 {
        (Some(f64::from(x_size)), Some(f64::from(y_size)))
    } else {
        (None, Some(f64::from(y_size)))
    };
    Ok(RotationBinding {
        swapped,
        x_size,
        y_size,
        mod_x,
        mod_y,
    })
}

fn reflect(value: f64, offset: Option<f64>) -> f64 {
    match offset {
        // Zero means "no data yet", not a true edge position.
        Some(m) if value != 0.0 => m - value,
        _ => value,
    }
}

impl RotationBinding {
    /// Map a raw centroid pair (already re-ordered onto canonical axes per
    /// [`CentroidAxis`]) into display coordinates.
    pub fn apply(&self, cx: f64, cy: f64) -> (f64, f64) {
        (reflect(cx, self.mod_x), reflect(cy, self.mod_y))
    }

    /// The native signal that supplies canonical x under this binding.
    ///
    /// Used when composing alignment plans: the walk steers whichever raw
    /// centroid channel the display calls "x".
    pub fn centroid_axis(&self) -> CentroidAxis {
        if self.swapped {
            CentroidAxis::NativeY
        } else {
            CentroidAxis::NativeX
        }
    }

    /// Convert a goal entered in display coordinates into the sensor's
    /// native frame, for handing to the execution engine.
    pub fn goal_to_native(&self, goal: f64) -> f64 {
        match self.mod_x {
            Some(m) => m - goal,
            None => goal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_at_zero_rotation() {
        let b = resolve(0.0, 1024, 768).unwrap();
        assert!(!b.swapped);
        assert_eq!((b.x_size, b.y_size), (1024, 768));
        assert_eq!(b.apply(300.5, 120.25), (300.5, 120.25));
        assert_eq!(b.centroid_axis(), CentroidAxis::NativeX);
        assert_eq!(b.goal_to_native(480.0), 480.0);
    }

    #[test]
    fn sizes_swap_only_at_quarter_turns() {
        for rot in [0.0, 180.0] {
            let b = resolve(rot, 1024, 768).unwrap();
            assert_eq!((b.x_size, b.y_size), (1024, 768), "rotation {rot}");
        }
        for rot in [90.0, 270.0] {
            let b = resolve(rot, 1024, 768).unwrap();
            assert_eq!((b.x_size, b.y_size), (768, 1024), "rotation {rot}");
            assert_eq!(b.centroid_axis(), CentroidAxis::NativeY);
        }
    }

    #[test]
    fn ninety_degree_scenario() {
        // 1024x768 sensor at 90 degrees, raw centroid (300, 0) after axis
        // re-ordering: x reflects about 768, zero y passes through.
        let b = resolve(90.0, 1024, 768).unwrap();
        assert_eq!((b.x_size, b.y_size), (768, 1024));
        assert_eq!(b.mod_x, Some(768.0));
        assert_eq!(b.mod_y, None);
        assert_eq!(b.apply(300.0, 0.0), (468.0, 0.0));
    }

    #[test]
    fn half_turn_reflects_both_axes() {
        let b = resolve(180.0, 640, 480).unwrap();
        assert_eq!(b.mod_x, Some(640.0));
        assert_eq!(b.mod_y, Some(480.0));
        assert_eq!(b.apply(100.0, 30.0), (540.0, 450.0));
    }

    #[test]
    fn two_seventy_reflects_y_only() {
        let b = resolve(270.0, 640, 480).unwrap();
        assert_eq!(b.mod_x, None);
        assert_eq!(b.mod_y, Some(640.0));
        assert_eq!(b.apply(12.0, 34.0), (12.0, 606.0));
    }

    #[test]
    fn zero_centroid_always_passes_through() {
        for rot in [0.0, 90.0, 180.0, 270.0] {
            let b = resolve(rot, 512, 512).unwrap();
            assert_eq!(b.apply(0.0, 0.0), (0.0, 0.0), "rotation {rot}");
        }
    }

    #[test]
    fn rotation_is_normalized_mod_360() {
        let quarter = resolve(90.0, 1024, 768).unwrap();
        assert_eq!(resolve(450.0, 1024, 768).unwrap(), quarter);
        // -90 normalizes to 270, not to 90.
        let neg = resolve(-90.0, 1024, 768).unwrap();
        assert_eq!(neg, resolve(270.0, 1024, 768).unwrap());
        assert_ne!(neg, quarter);
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert!(matches!(
            resolve(0.0, 0, 768),
            Err(AlignError::Configuration(_))
        ));
        assert!(matches!(
            resolve(90.0, 1024, 0),
            Err(AlignError::Configuration(_))
        ));
    }

    #[test]
    fn goal_converts_to_native_frame() {
        let b = resolve(90.0, 1024, 768).unwrap();
        // Walking to display-x 468 means steering native y to 300.
        assert_eq!(b.goal_to_native(468.0), 300.0);
    }
}
