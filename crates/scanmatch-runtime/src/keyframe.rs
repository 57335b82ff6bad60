//! Keyframe lifecycle.
//!
//! A [`Keyframe`] owns the reference [`PointSet`] and the fixed-frame pose
//! it was captured at.  Each cycle hands the freshly built point set to
//! [`Keyframe::advance`], which either promotes it to the new reference or
//! drops it.  Point sets are moved, never shared, so every set the builder
//! produces ends up either as the reference or dropped.

use scanmatch_perception::point_set::PointSet;
use scanmatch_perception::transform::{RigidTransform2D, Transform3D};
use tracing::debug;

/// Distance thresholds that trigger a new keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframePolicy {
    linear: f64,
    linear_sq: f64,
    angular: f64,
}

impl KeyframePolicy {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self {
            linear,
            linear_sq: linear * linear,
            angular,
        }
    }

    pub fn linear(&self) -> f64 {
        self.linear
    }

    pub fn angular(&self) -> f64 {
        self.angular
    }

    /// True when `offset` from the current keyframe exceeds either threshold
    /// (strictly).
    ///
    /// The heading is recovered from a quaternion, so an angle equal to the
    /// threshold may come back one ulp above it (0.2 rad does) and promote.
    pub fn needs_new_keyframe(&self, offset: &Transform3D) -> bool {
        if offset.yaw().abs() > self.angular {
            return true;
        }
        RigidTransform2D::from_transform(offset).translation_norm_sq() > self.linear_sq
    }
}

/// Reference point set plus the base pose it was captured at.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    reference: PointSet,
    pose: Transform3D,
}

impl Keyframe {
    pub fn new(reference: PointSet, pose: Transform3D) -> Self {
        Self { reference, pose }
    }

    pub fn reference(&self) -> &PointSet {
        &self.reference
    }

    /// Mutable access for resetting the reference's motion fields before a
    /// solver call.
    pub fn reference_mut(&mut self) -> &mut PointSet {
        &mut self.reference
    }

    /// Base pose of the keyframe in the fixed frame.
    pub fn pose(&self) -> &Transform3D {
        &self.pose
    }

    /// Promote `current` when `offset` crosses a threshold of `policy`,
    /// otherwise drop it.  Returns whether a promotion happened.
    pub fn advance(
        &mut self,
        current: PointSet,
        offset: &Transform3D,
        new_pose: Transform3D,
        policy: &KeyframePolicy,
    ) -> bool {
        if policy.needs_new_keyframe(offset) {
            debug!(
                x = new_pose.translation.x,
                y = new_pose.translation.y,
                yaw = new_pose.yaw(),
                points = current.len(),
                "promoting keyframe"
            );
            self.reference = current;
            self.pose = new_pose;
            true
        } else {
            false
        }
    }
}
