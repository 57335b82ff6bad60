//! Sensor ↔ base ↔ fixed frame bookkeeping.
//!
//! The solver works in the keyframe's sensor frame; predictions and outputs
//! live in the base and fixed frames.  [`FrameChain`] caches the static
//! mounting transform and converts between the two worlds in 3-D, so
//! sensors mounted with roll or pitch (upside down, tilted) are handled.

use std::time::Duration;

use scanmatch_perception::tf_buffer::FrameLookup;
use scanmatch_perception::transform::{Quaternion, RigidTransform2D, Transform3D};
use scanmatch_types::ScanMatchError;

/// Cached static transform between the base and the range sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameChain {
    base_from_sensor: Transform3D,
    sensor_from_base: Transform3D,
}

impl FrameChain {
    pub fn new(base_from_sensor: Transform3D) -> Self {
        Self {
            base_from_sensor,
            sensor_from_base: base_from_sensor.inverse(),
        }
    }

    /// Query the pose of `sensor_frame` in `base_frame` (latest available).
    pub fn resolve(
        lookup: &dyn FrameLookup,
        base_frame: &str,
        sensor_frame: &str,
        timeout: Duration,
    ) -> Result<Self, ScanMatchError> {
        lookup
            .lookup(base_frame, sensor_frame, None, timeout)
            .map(Self::new)
    }

    pub fn base_from_sensor(&self) -> Transform3D {
        self.base_from_sensor
    }

    pub fn sensor_from_base(&self) -> Transform3D {
        self.sensor_from_base
    }

    /// First guess for the solver: the predicted base pose re-expressed as an
    /// offset of the keyframe sensor pose.
    pub fn solver_guess(
        &self,
        keyframe_pose: &Transform3D,
        last_pose: &Transform3D,
        predicted_base_offset: &Transform3D,
    ) -> RigidTransform2D {
        let predicted_pose = last_pose.compose(*predicted_base_offset);
        let keyframe_base_offset = keyframe_pose.inverse().compose(predicted_pose);
        let sensor_offset = self
            .sensor_from_base
            .compose(keyframe_base_offset)
            .compose(self.base_from_sensor);
        RigidTransform2D::from_transform(&sensor_offset)
    }

    /// Convert a solver result from the keyframe sensor frame to the
    /// keyframe base frame.
    pub fn base_offset(&self, measured_sensor_offset: &RigidTransform2D) -> Transform3D {
        self.base_from_sensor
            .compose(measured_sensor_offset.to_transform())
            .compose(self.sensor_from_base)
    }

    /// Fixed-frame heading of the sensor when the base is at `base_pose`.
    pub fn sensor_heading(&self, base_pose: &Transform3D) -> f64 {
        base_pose.compose(self.sensor_from_base).yaw()
    }
}

/// Replace roll and pitch of `pose` with those of `orientation`, keeping its
/// yaw and translation.
pub fn level_with(pose: &Transform3D, orientation: Quaternion) -> Transform3D {
    let (roll, pitch, _) = orientation.to_rpy();
    let (_, _, yaw) = pose.rotation.to_rpy();
    Transform3D::new(pose.translation, Quaternion::from_rpy(roll, pitch, yaw))
}
