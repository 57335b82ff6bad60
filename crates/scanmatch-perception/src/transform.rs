//! Rigid-body geometry.
//!
//! [`Transform3D`] (translation + unit quaternion) is used for every frame
//! chain in the pipeline so that sensors mounted with roll or pitch (for
//! example an upside-down laser) are handled exactly.  The alignment solver
//! works in the plane, so [`RigidTransform2D`] carries its `(x, y, θ)` view.
//!
//! # Example
//!
//! ```rust
//! use scanmatch_perception::transform::{RigidTransform2D, Transform3D};
//!
//! let step = RigidTransform2D::new(1.0, 0.0, std::f64::consts::FRAC_PI_2);
//! let twice = step.to_transform().compose(step.to_transform());
//! let planar = RigidTransform2D::from_transform(&twice);
//! assert!((planar.x - 1.0).abs() < 1e-9);
//! assert!((planar.y - 1.0).abs() < 1e-9);
//! ```

use std::f64::consts::FRAC_PI_2;

use scanmatch_types::{Orientation, Pose, Vector3};
use serde::{Deserialize, Serialize};

/// Wrap an angle into `[-π, π]`.
pub fn normalize_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn lerp(self, other: Self, t: f64) -> Self {
        self.scale(1.0 - t).add(other.scale(t))
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Quaternion::normalized`].
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build from fixed-axis roll, pitch, yaw (applied about X, then Y, then Z).
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Pure rotation about Z.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_rpy(0.0, 0.0, yaw)
    }

    /// Decompose into `(roll, pitch, yaw)`.
    pub fn to_rpy(self) -> (f64, f64, f64) {
        let roll = (2.0 * (self.w * self.x + self.y * self.z))
            .atan2(1.0 - 2.0 * (self.x * self.x + self.y * self.y));
        let sin_pitch = 2.0 * (self.w * self.y - self.z * self.x);
        let pitch = if sin_pitch.abs() >= 1.0 {
            FRAC_PI_2.copysign(sin_pitch)
        } else {
            sin_pitch.asin()
        };
        (roll, pitch, self.yaw())
    }

    /// Heading about Z.
    pub fn yaw(self) -> f64 {
        (2.0 * (self.w * self.z + self.x * self.y))
            .atan2(1.0 - 2.0 * (self.y * self.y + self.z * self.z))
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Scale to unit length.  A zero quaternion becomes the identity.
    pub fn normalized(self) -> Self {
        let norm = self.dot(self).sqrt();
        if norm <= f64::EPSILON || !norm.is_finite() {
            return Self::identity();
        }
        Self::new(self.w / norm, self.x / norm, self.y / norm, self.z / norm)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation along the shortest arc.
    pub fn slerp(self, other: Self, t: f64) -> Self {
        let mut cos = self.dot(other);
        let mut end = other;
        if cos < 0.0 {
            cos = -cos;
            end = Self::new(-other.w, -other.x, -other.y, -other.z);
        }
        let (a, b) = if cos > 0.9995 {
            (1.0 - t, t)
        } else {
            let theta = cos.acos();
            let sin = theta.sin();
            (((1.0 - t) * theta).sin() / sin, (t * theta).sin() / sin)
        };
        Self::new(
            a * self.w + b * end.w,
            a * self.x + b * end.x,
            a * self.y + b * end.y,
            a * self.z + b * end.z,
        )
        .normalized()
    }
}

impl From<Orientation> for Quaternion {
    fn from(o: Orientation) -> Self {
        Self::new(o.w, o.x, o.y, o.z).normalized()
    }
}

impl From<Quaternion> for Orientation {
    fn from(q: Quaternion) -> Self {
        Orientation {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar transform lifted into 3-D (z = 0, rotation about Z only).
    pub fn from_xy_theta(x: f64, y: f64, theta: f64) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(theta))
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rotation = self.rotation.conjugate();
        let inv_translation = inv_rotation.rotate(self.translation).scale(-1.0);
        Self::new(inv_translation, inv_rotation)
    }

    /// Heading of the rotation about Z.
    pub fn yaw(&self) -> f64 {
        self.rotation.yaw()
    }

    /// Interpolate translation linearly and rotation spherically.
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self::new(
            self.translation.lerp(other.translation, t),
            self.rotation.slerp(other.rotation, t),
        )
    }

    pub fn to_pose(self) -> Pose {
        Pose {
            position: Vector3::new(self.translation.x, self.translation.y, self.translation.z),
            orientation: self.rotation.into(),
        }
    }
}

impl From<&Pose> for Transform3D {
    fn from(pose: &Pose) -> Self {
        Self::new(
            Vec3::new(pose.position.x, pose.position.y, pose.position.z),
            pose.orientation.into(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RigidTransform2D
// ────────────────────────────────────────────────────────────────────────────

/// Planar rigid transform: translation `(x, y)` and heading `theta`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidTransform2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl RigidTransform2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    /// Project a 3-D transform onto the plane (keeps x, y and yaw).
    pub fn from_transform(t: &Transform3D) -> Self {
        Self::new(t.translation.x, t.translation.y, t.yaw())
    }

    pub fn to_transform(self) -> Transform3D {
        Transform3D::from_xy_theta(self.x, self.y, self.theta)
    }

    /// `self ∘ other`.
    pub fn compose(self, other: Self) -> Self {
        let (s, c) = self.theta.sin_cos();
        Self::new(
            self.x + c * other.x - s * other.y,
            self.y + s * other.x + c * other.y,
            normalize_angle(self.theta + other.theta),
        )
    }

    pub fn inverse(self) -> Self {
        let (s, c) = self.theta.sin_cos();
        Self::new(
            -c * self.x - s * self.y,
            s * self.x - c * self.y,
            normalize_angle(-self.theta),
        )
    }

    /// Squared planar distance from the origin.
    pub fn translation_norm_sq(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
