//! Prediction Fusion.
//!
//! Merges the auxiliary motion cues (velocity, odometry, absolute orientation
//! and the frame graph) into one base-frame motion guess since the previous
//! cycle.  Sources do not blend: each enabled source that has data
//! **overwrites** part or all of the estimate built so far, in this order:
//!
//! 1. identity;
//! 2. velocity – `Δt × v` for translation, `Δt × ω_z` for heading (whole
//!    estimate);
//! 3. odometry – `last_used⁻¹ ∘ latest` (whole estimate);
//! 4. orientation – `last_used⁻¹ ∘ latest` (rotation only);
//! 5. frame lookup – relative base pose between the two cycle stamps (whole
//!    estimate), skipped with a warning on failure.
//!
//! Odometry and orientation samples are consumed once: after a prediction
//! the latest sample becomes the new baseline.
//!
//! Input callbacks write into a shared [`PredictionInputs`] handle; every
//! write and the step 1–4 read take the same short-lived lock.  The frame
//! lookup in step 5 may block up to its timeout and runs with the lock
//! released.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeDelta, Utc};
//! use scanmatch_perception::fusion::{FrameQuery, PredictionFusion, PredictionSettings};
//! use scanmatch_perception::tf_buffer::TfBuffer;
//! use scanmatch_types::{Twist, Vector3, VelocityMessage};
//!
//! let settings = PredictionSettings {
//!     use_vel: true,
//!     use_odom: false,
//!     use_imu: false,
//!     use_tf: false,
//!     ..PredictionSettings::default()
//! };
//! let fusion = PredictionFusion::new(settings);
//! fusion.inputs().update_velocity(VelocityMessage::Twist(Twist {
//!     linear: Vector3::new(1.0, 0.0, 0.0),
//!     angular: Vector3::default(),
//! }));
//!
//! let previous = Utc::now();
//! let query = FrameQuery::new("base_link", "world", previous, previous + TimeDelta::milliseconds(500));
//! let guess = fusion.predict(&TfBuffer::new(), &query);
//! assert!((guess.translation.x - 0.5).abs() < 1e-9);
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scanmatch_types::{ImuMessage, OdometryMessage, Stamp, Twist, VelocityMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tf_buffer::FrameLookup;
use crate::transform::{Quaternion, Transform3D};

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Which prediction sources are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSettings {
    pub use_vel: bool,
    pub use_odom: bool,
    pub use_imu: bool,
    pub use_tf: bool,
    /// Accept `TwistStamped` velocity instead of plain `Twist`.
    pub stamped_vel: bool,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            use_vel: false,
            use_odom: true,
            use_imu: true,
            use_tf: true,
            stamped_vel: false,
        }
    }
}

/// Frames and stamps for the step-5 frame lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameQuery {
    pub base_frame: String,
    pub fixed_frame: String,
    /// Stamp of the previous cycle.
    pub previous: Stamp,
    /// Stamp of the reading being processed.
    pub current: Stamp,
    pub timeout: Duration,
}

impl FrameQuery {
    pub fn new(
        base_frame: impl Into<String>,
        fixed_frame: impl Into<String>,
        previous: Stamp,
        current: Stamp,
    ) -> Self {
        Self {
            base_frame: base_frame.into(),
            fixed_frame: fixed_frame.into(),
            previous,
            current,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Seconds elapsed between the two stamps.
    pub fn dt(&self) -> f64 {
        (self.current - self.previous)
            .num_nanoseconds()
            .map_or(0.0, |ns| ns as f64 * 1e-9)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared sources
// ────────────────────────────────────────────────────────────────────────────

/// Latest motion cues.  `None` means the source has never reported.
#[derive(Debug, Default)]
struct PredictionSources {
    velocity: Twist,
    velocity_received: bool,
    latest_odometry: Option<Transform3D>,
    last_used_odometry: Transform3D,
    latest_orientation: Option<Quaternion>,
    last_used_orientation: Quaternion,
}

/// Cloneable writer handle for the input callbacks.
#[derive(Debug, Clone)]
pub struct PredictionInputs {
    sources: Arc<Mutex<PredictionSources>>,
    stamped_vel: bool,
}

impl PredictionInputs {
    fn new(stamped_vel: bool) -> Self {
        Self {
            sources: Arc::new(Mutex::new(PredictionSources::default())),
            stamped_vel,
        }
    }

    /// Store the latest velocity.  Returns `false` (and stores nothing) when
    /// the message shape does not match the configured one.
    pub fn update_velocity(&self, msg: VelocityMessage) -> bool {
        let twist = match (msg, self.stamped_vel) {
            (VelocityMessage::Twist(t), false) => t,
            (VelocityMessage::Stamped(t), true) => t.twist,
            (_, expected_stamped) => {
                warn!(expected_stamped, "ignoring velocity message of the wrong shape");
                return false;
            }
        };
        let mut s = self.sources.lock();
        s.velocity = twist;
        s.velocity_received = true;
        true
    }

    /// Store the latest odometry pose.  The first sample also seeds the
    /// baseline, so the first odometry prediction is identity.
    pub fn update_odometry(&self, msg: &OdometryMessage) {
        let pose = Transform3D::from(&msg.pose);
        let mut s = self.sources.lock();
        if s.latest_odometry.is_none() {
            s.last_used_odometry = pose;
        }
        s.latest_odometry = Some(pose);
    }

    /// Store the latest absolute orientation.  The first sample also seeds
    /// the baseline.
    pub fn update_orientation(&self, msg: &ImuMessage) {
        let q = Quaternion::from(msg.orientation);
        let mut s = self.sources.lock();
        if s.latest_orientation.is_none() {
            s.last_used_orientation = q;
        }
        s.latest_orientation = Some(q);
    }

    /// Most recent absolute orientation, if any was received.
    pub fn latest_orientation(&self) -> Option<Quaternion> {
        self.sources.lock().latest_orientation
    }

    pub fn velocity_received(&self) -> bool {
        self.sources.lock().velocity_received
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PredictionFusion
// ────────────────────────────────────────────────────────────────────────────

/// Layered-overwrite motion predictor.
#[derive(Debug, Clone)]
pub struct PredictionFusion {
    settings: PredictionSettings,
    inputs: PredictionInputs,
}

impl PredictionFusion {
    pub fn new(settings: PredictionSettings) -> Self {
        Self {
            inputs: PredictionInputs::new(settings.stamped_vel),
            settings,
        }
    }

    pub fn settings(&self) -> &PredictionSettings {
        &self.settings
    }

    /// Handle for the velocity, odometry and orientation callbacks.
    pub fn inputs(&self) -> &PredictionInputs {
        &self.inputs
    }

    /// Predicted base motion between `query.previous` and `query.current`.
    pub fn predict(&self, lookup: &dyn FrameLookup, query: &FrameQuery) -> Transform3D {
        let mut guess = self.predict_from_sources(query.dt());

        if self.settings.use_tf {
            match lookup.lookup_between(
                &query.base_frame,
                query.previous,
                &query.base_frame,
                query.current,
                &query.fixed_frame,
                query.timeout,
            ) {
                Ok(offset) => guess = offset,
                Err(e) => {
                    warn!(
                        error = %e,
                        base = %query.base_frame,
                        fixed = %query.fixed_frame,
                        "could not get base to fixed frame transform"
                    );
                }
            }
        }

        guess
    }

    /// Steps 1–4, under one acquisition of the sources lock.
    fn predict_from_sources(&self, dt: f64) -> Transform3D {
        let mut s = self.inputs.sources.lock();

        // ── 1. Zero motion ──
        let mut guess = Transform3D::identity();

        // ── 2. Velocity ──
        if self.settings.use_vel {
            let v = s.velocity;
            guess = Transform3D::from_xy_theta(dt * v.linear.x, dt * v.linear.y, dt * v.angular.z);
        }

        // ── 3. Odometry ──
        if self.settings.use_odom
            && let Some(latest) = s.latest_odometry
        {
            guess = s.last_used_odometry.inverse().compose(latest);
            s.last_used_odometry = latest;
        }

        // ── 4. Orientation ──
        if self.settings.use_imu
            && let Some(latest) = s.latest_orientation
        {
            guess.rotation = s.last_used_orientation.conjugate().mul(latest);
            s.last_used_orientation = latest;
        }

        debug!(
            x = guess.translation.x,
            y = guess.translation.y,
            yaw = guess.yaw(),
            "prediction from motion sources"
        );
        guess
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
