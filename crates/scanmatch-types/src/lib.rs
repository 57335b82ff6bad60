use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Acquisition time attached to every sensor message.
pub type Stamp = DateTime<Utc>;

/// Time and coordinate frame a message is expressed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Stamp,
    /// e.g., "laser", "base_link", "world"
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Stamp, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Plain 3-component vector used for positions, velocities and cloud samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion as carried on the wire (x, y, z, w order).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Orientation,
}

// ────────────────────────────────────────────────────────────────────────────
// Inputs
// ────────────────────────────────────────────────────────────────────────────

/// A planar range reading: one range per bearing, bearings evenly spaced
/// starting at `angle_min`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub header: Header,
    /// Bearing of the first range sample (radians).
    pub angle_min: f64,
    /// Angular step between consecutive samples (radians).
    pub angle_increment: f64,
    /// Readings at or below this value are invalid (metres).
    pub range_min: f64,
    /// Readings at or above this value are invalid (metres).
    pub range_max: f64,
    pub ranges: Vec<f64>,
}

/// An unordered-in-space but ordered-in-sequence list of Cartesian samples in
/// the sensor frame.  The z coordinate is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Vector3>,
}

/// One range reading of either shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeInput {
    Scan(LaserScan),
    Cloud(PointCloud),
}

impl RangeInput {
    pub fn header(&self) -> &Header {
        match self {
            RangeInput::Scan(scan) => &scan.header,
            RangeInput::Cloud(cloud) => &cloud.header,
        }
    }
}

/// Absolute orientation from an inertial sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuMessage {
    pub header: Header,
    pub orientation: Orientation,
}

/// Wheel (or other dead-reckoning) odometry pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OdometryMessage {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: Pose,
}

/// Instantaneous linear and angular velocity, expressed in the base frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwistStamped {
    pub header: Header,
    pub twist: Twist,
}

/// Either shape of velocity message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VelocityMessage {
    Twist(Twist),
    Stamped(TwistStamped),
}

// ────────────────────────────────────────────────────────────────────────────
// Outputs
// ────────────────────────────────────────────────────────────────────────────

/// Planar pose of the base in the fixed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

/// Pose with a 6×6 covariance over (x, y, z, roll, pitch, yaw), row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    pub covariance: [[f64; 6]; 6],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovarianceStamped {
    pub header: Header,
    pub pose: PoseWithCovariance,
}

/// Pose of `child_frame_id` expressed in `header.frame_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Pose,
}

/// Unified event wrapper for the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "scanmatch-runtime::scan_matcher"
    pub source: String,
    pub payload: EventPayload,
}

/// Variants of data that can be routed over the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Pose2D(Pose2D),
    PoseStamped(PoseStamped),
    PoseWithCovariance(PoseWithCovariance),
    PoseWithCovarianceStamped(PoseWithCovarianceStamped),
    /// Fixed → base rigid-transform broadcast.
    Transform(TransformStamped),
}

/// Error type shared by every scan-matching crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanMatchError {
    #[error("No transform from {parent} to {child}: {details}")]
    TransformUnavailable {
        parent: String,
        child: String,
        details: String,
    },

    #[error("Timed out after {waited_ms} ms waiting for {parent} -> {child}")]
    LookupTimeout {
        parent: String,
        child: String,
        waited_ms: u64,
    },

    #[error("Transform {parent} -> {child} requested outside buffered time range")]
    Extrapolation { parent: String, child: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}
