//! Attitude → rotation matrix, and rigid point-set transforms.
//!
//! Angles follow the aerospace (ArduPilot) convention: the body-to-world
//! rotation is composed as yaw ∘ pitch ∘ roll.
//!
//! ```text
//!     | cp*cy   sr*sp*cy - cr*sy   cr*sp*cy + sr*sy |
//! R = | cp*sy   sr*sp*sy + cr*cy   cr*sp*sy - sr*cy |
//!     | -sp     sr*cp              cr*cp            |
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::f32::consts::FRAC_PI_2;
//! use skyfuse_perception::rotation::{rotation_from_euler, transform_points};
//! use skyfuse_perception::{Point3, Vector3};
//!
//! // Nose pitched straight up: body +X points down in the world frame
//! // (z-down convention).
//! let r = rotation_from_euler(0.0, FRAC_PI_2, 0.0);
//! let out = transform_points(&[Point3::new(1.0, 0.0, 0.0)], &r, &Vector3::zeros());
//! assert!((out[0].z + 1.0).abs() < 1e-5);
//! ```

use nalgebra::{Matrix3, Point3, Vector3};

/// Build the body-to-world rotation matrix for the given Euler angles
/// (radians).
///
/// The result is orthonormal with determinant 1 for all finite inputs, and
/// `rotation_from_euler(0.0, 0.0, 0.0)` is exactly the identity.
pub fn rotation_from_euler(roll: f32, pitch: f32, yaw: f32) -> Matrix3<f32> {
    let (sp, cp) = pitch.sin_cos();
    let (sr, cr) = roll.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    // Row-major argument order.
    Matrix3::new(
        cp * cy,
        (sr * sp * cy) - (cr * sy),
        (cr * sp * cy) + (sr * sy),
        cp * sy,
        (sr * sp * sy) + (cr * cy),
        (cr * sp * sy) - (sr * cy),
        -sp,
        sr * cp,
        cr * cp,
    )
}

/// Recover `(roll, pitch, yaw)` from a matrix built by
/// [`rotation_from_euler`].
///
/// Pitch is confined to `[-π/2, π/2]`; at exactly ±π/2 roll and yaw are not
/// separable and the split between them is arbitrary.
pub fn euler_from_rotation(r: &Matrix3<f32>) -> (f32, f32, f32) {
    let pitch = -r[(2, 0)].clamp(-1.0, 1.0).asin();
    let roll = r[(2, 1)].atan2(r[(2, 2)]);
    let yaw = r[(1, 0)].atan2(r[(0, 0)]);
    (roll, pitch, yaw)
}

/// Apply `p' = R·p + t` to every point, returning a fresh vector.
pub fn transform_points(
    points: &[Point3<f32>],
    rotation: &Matrix3<f32>,
    translation: &Vector3<f32>,
) -> Vec<Point3<f32>> {
    points
        .iter()
        .map(|p| Point3::from(rotation * p.coords + translation))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
