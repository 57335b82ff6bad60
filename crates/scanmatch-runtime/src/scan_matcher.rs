//! [`ScanMatcher`] – the per-reading pipeline.
//!
//! Each call to [`ScanMatcher::process`] runs one full registration cycle:
//!
//! 1. **Initialise** (first accepted reading only) – resolve and cache the
//!    static sensor → base transform; install the reading as the first
//!    keyframe.  If the transform is unavailable the reading is dropped and
//!    the next one retries.
//! 2. **Build** – convert the reading into a [`PointSet`].
//! 3. **Predict** – ask [`PredictionFusion`] for the base motion since the
//!    previous cycle and turn it into a sensor-local first guess.
//! 4. **Align** – hand keyframe reference, current set and guess to the
//!    [`Aligner`].
//! 5. **Integrate** – on a valid match, update the fixed-frame pose, project
//!    the covariance and publish the enabled outputs.
//! 6. **Keyframe** – promote the current set or drop it.
//!
//! Readings are processed strictly one at a time; motion cues arrive through
//! the [`PredictionInputs`] handle from any thread.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use scanmatch_middleware::{EventBus, Topic};
//! use scanmatch_perception::point_set::PointSet;
//! use scanmatch_perception::tf_buffer::TfBuffer;
//! use scanmatch_perception::transform::{RigidTransform2D, Transform3D};
//! use scanmatch_runtime::{CycleOutcome, MatchResult, ScanMatcher, ScanMatcherConfig, SolverConfig};
//! use scanmatch_types::{Header, LaserScan, RangeInput};
//!
//! let tf = Arc::new(TfBuffer::new());
//! tf.set_static_transform("base_link", "laser", Transform3D::identity());
//! let bus = Arc::new(EventBus::default());
//! let mut poses = bus.subscribe_to(Topic::Pose2D);
//!
//! // A stand-in solver that always reports zero motion.
//! let aligner = |_: &PointSet, _: &PointSet, _: RigidTransform2D, _: &SolverConfig| {
//!     MatchResult::valid(RigidTransform2D::identity())
//! };
//! let mut matcher = ScanMatcher::new(ScanMatcherConfig::default(), aligner, tf, bus).unwrap();
//!
//! let scan = LaserScan {
//!     header: Header::new(Utc::now(), "laser"),
//!     angle_increment: 0.01,
//!     range_min: 0.1,
//!     range_max: 30.0,
//!     ranges: vec![2.0; 360],
//!     ..LaserScan::default()
//! };
//! assert!(matches!(matcher.process(&RangeInput::Scan(scan)), CycleOutcome::Matched(_)));
//! assert!(poses.try_recv().is_ok());
//! ```

use std::sync::Arc;
use std::time::Instant;

use scanmatch_middleware::bus::{Publisher, Topic, make_event};
use scanmatch_perception::covariance::{self, Covariance6, DefaultCovariance};
use scanmatch_perception::fusion::{FrameQuery, PredictionFusion, PredictionInputs};
use scanmatch_perception::point_set::{self, CloudFilter, PointSet};
use scanmatch_perception::tf_buffer::FrameLookup;
use scanmatch_perception::transform::Transform3D;
use scanmatch_types::{
    EventPayload, Header, Pose2D, PoseStamped, PoseWithCovariance, PoseWithCovarianceStamped,
    RangeInput, ScanMatchError, Stamp, TransformStamped,
};
use tracing::{debug, debug_span, field, info, warn};

use crate::config::{ScanMatcherConfig, SolverConfig};
use crate::frame_chain::{FrameChain, level_with};
use crate::keyframe::{Keyframe, KeyframePolicy};
use crate::solver::Aligner;
use crate::telemetry::{OUTCOME_FIELD, SCAN_MATCH_SPAN};

/// `source` field of every published event.
const EVENT_SOURCE: &str = "scanmatch-runtime::scan_matcher";

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// What a valid cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutput {
    /// Published base pose in the fixed frame (leveled when enabled).
    pub pose: Transform3D,
    pub covariance: Covariance6,
    pub keyframe_promoted: bool,
}

/// Result of processing one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The reading's shape does not match the configured input kind.
    Ignored,
    /// The static sensor transform is not available yet.
    Dropped,
    Matched(MatchOutput),
    /// The solver rejected the match; nothing was published.
    MatchFailed,
}

impl CycleOutcome {
    /// Short name recorded on the cycle span.
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Ignored => "ignored",
            CycleOutcome::Dropped => "dropped",
            CycleOutcome::Matched(out) if out.keyframe_promoted => "matched_new_keyframe",
            CycleOutcome::Matched(_) => "matched",
            CycleOutcome::MatchFailed => "match_failed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Tracking {
    chain: FrameChain,
    keyframe: Keyframe,
    /// Base pose of the most recent valid match, in the fixed frame.
    last_pose: Transform3D,
    last_time: Stamp,
}

#[derive(Debug)]
enum MatcherState {
    Uninitialized,
    Steady(Tracking),
}

// ─────────────────────────────────────────────────────────────────────────────
// ScanMatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Keyframe-relative scan-matching pipeline.
pub struct ScanMatcher {
    config: ScanMatcherConfig,
    solver_config: SolverConfig,
    policy: KeyframePolicy,
    cloud_filter: CloudFilter,
    default_covariance: DefaultCovariance,
    fusion: PredictionFusion,
    aligner: Box<dyn Aligner>,
    lookup: Arc<dyn FrameLookup>,
    publisher: Arc<dyn Publisher>,
    state: MatcherState,
}

impl ScanMatcher {
    /// Build a pipeline.  Fails only if `config` does not validate.
    pub fn new(
        config: ScanMatcherConfig,
        aligner: impl Aligner + 'static,
        lookup: Arc<dyn FrameLookup>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, ScanMatchError> {
        config.validate()?;

        let mut solver_config = config.solver.clone();
        if config.use_cloud_input {
            solver_config.min_reading = config.cloud_range_min;
            solver_config.max_reading = config.cloud_range_max;
        }

        info!(
            base_frame = %config.base_frame,
            fixed_frame = %config.fixed_frame,
            use_cloud_input = config.use_cloud_input,
            use_imu = config.use_imu,
            use_odom = config.use_odom,
            use_vel = config.use_vel,
            use_tf = config.use_tf,
            kf_dist_linear = config.kf_dist_linear,
            kf_dist_angular = config.kf_dist_angular,
            "starting scan matcher"
        );

        Ok(Self {
            policy: config.keyframe_policy(),
            cloud_filter: config.cloud_filter(),
            default_covariance: config.default_covariance(),
            fusion: PredictionFusion::new(config.prediction_settings()),
            solver_config,
            config,
            aligner: Box::new(aligner),
            lookup,
            publisher,
            state: MatcherState::Uninitialized,
        })
    }

    pub fn config(&self) -> &ScanMatcherConfig {
        &self.config
    }

    /// Solver settings as handed to the aligner, including the range bounds
    /// filled in from the input.
    pub fn solver_config(&self) -> &SolverConfig {
        &self.solver_config
    }

    /// Writer handle for velocity, odometry and orientation inputs.
    pub fn inputs(&self) -> &PredictionInputs {
        self.fusion.inputs()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, MatcherState::Steady(_))
    }

    /// Base pose in the fixed frame after the last valid match.
    pub fn pose(&self) -> Option<Transform3D> {
        match &self.state {
            MatcherState::Steady(t) => Some(t.last_pose),
            MatcherState::Uninitialized => None,
        }
    }

    pub fn keyframe_pose(&self) -> Option<Transform3D> {
        match &self.state {
            MatcherState::Steady(t) => Some(*t.keyframe.pose()),
            MatcherState::Uninitialized => None,
        }
    }

    /// Run one registration cycle for `input`.
    pub fn process(&mut self, input: &RangeInput) -> CycleOutcome {
        let is_cloud = matches!(input, RangeInput::Cloud(_));
        if is_cloud != self.config.use_cloud_input {
            warn!(
                use_cloud_input = self.config.use_cloud_input,
                "ignoring reading of the wrong input kind"
            );
            return CycleOutcome::Ignored;
        }

        let header = input.header();
        let span = debug_span!(SCAN_MATCH_SPAN, frame = %header.frame_id, outcome = field::Empty);
        let _enter = span.enter();
        let start = Instant::now();

        let outcome = if !self.is_initialized()
            && let Err(e) = self.initialize(input)
        {
            warn!(error = %e, "skipping scan");
            CycleOutcome::Dropped
        } else {
            let current = self.build_point_set(input);
            self.register(current, header.stamp)
        };

        span.record(OUTCOME_FIELD, outcome.label());
        debug!(
            duration_ms = start.elapsed().as_secs_f64() * 1e3,
            "scan matcher total duration"
        );
        outcome
    }

    // ── Pipeline steps ─────────────────────────────────────────────────────────

    fn initialize(&mut self, input: &RangeInput) -> Result<(), ScanMatchError> {
        let header = input.header();
        let chain = FrameChain::resolve(
            self.lookup.as_ref(),
            &self.config.base_frame,
            &header.frame_id,
            self.config.tf_timeout(),
        )?;

        if let RangeInput::Scan(scan) = input {
            self.solver_config.min_reading = scan.range_min;
            self.solver_config.max_reading = scan.range_max;
        }

        let reference = self.build_point_set(input);
        info!(
            sensor_frame = %header.frame_id,
            points = reference.len(),
            "static sensor transform resolved, first keyframe installed"
        );
        self.state = MatcherState::Steady(Tracking {
            chain,
            keyframe: Keyframe::new(reference, Transform3D::identity()),
            last_pose: Transform3D::identity(),
            last_time: header.stamp,
        });
        Ok(())
    }

    fn build_point_set(&self, input: &RangeInput) -> PointSet {
        match input {
            RangeInput::Scan(scan) => point_set::from_scan(scan),
            RangeInput::Cloud(cloud) => point_set::from_cloud(cloud, &self.cloud_filter),
        }
    }

    fn register(&mut self, current: PointSet, stamp: Stamp) -> CycleOutcome {
        let MatcherState::Steady(tracking) = &mut self.state else {
            return CycleOutcome::Dropped;
        };

        // ── 1. Predict ────────────────────────────────────────────────────────
        let query = FrameQuery::new(
            self.config.base_frame.as_str(),
            self.config.fixed_frame.as_str(),
            tracking.last_time,
            stamp,
        )
        .with_timeout(self.config.tf_timeout());
        let predicted = self.fusion.predict(self.lookup.as_ref(), &query);
        let guess = tracking
            .chain
            .solver_guess(tracking.keyframe.pose(), &tracking.last_pose, &predicted);

        // ── 2. Align ──────────────────────────────────────────────────────────
        tracking.keyframe.reference_mut().reset_motion();
        let result = self.aligner.align(
            tracking.keyframe.reference(),
            &current,
            guess,
            &self.solver_config,
        );

        // ── 3. Integrate ──────────────────────────────────────────────────────
        let mut output = None;
        let base_offset = if result.valid {
            let base_offset = tracking.chain.base_offset(&result.transform);
            tracking.last_pose = tracking.keyframe.pose().compose(base_offset);

            let mut published = tracking.last_pose;
            if self.config.add_imu_roll_pitch
                && self.config.use_imu
                && let Some(orientation) = self.fusion.inputs().latest_orientation()
            {
                published = level_with(&published, orientation);
            }

            let estimate = if self.solver_config.do_compute_covariance {
                result.covariance.as_ref()
            } else {
                None
            };
            let heading = tracking.chain.sensor_heading(tracking.keyframe.pose());
            let covariance = covariance::project(estimate, heading, &self.default_covariance);

            output = Some((published, covariance));
            base_offset
        } else {
            warn!("error in scan matching");
            Transform3D::identity()
        };

        // ── 4. Keyframe ───────────────────────────────────────────────────────
        let promoted = tracking.keyframe.advance(
            current,
            &base_offset,
            tracking.last_pose,
            &self.policy,
        );
        tracking.last_time = stamp;

        match output {
            Some((pose, covariance)) => {
                self.publish_outputs(&pose, &covariance, stamp);
                CycleOutcome::Matched(MatchOutput {
                    pose,
                    covariance,
                    keyframe_promoted: promoted,
                })
            }
            None => CycleOutcome::MatchFailed,
        }
    }

    fn publish_outputs(&self, pose: &Transform3D, covariance: &Covariance6, stamp: Stamp) {
        let cfg = &self.config;
        let header = Header::new(stamp, cfg.fixed_frame.clone());
        let msg_pose = pose.to_pose();
        let with_covariance = PoseWithCovariance {
            pose: msg_pose,
            covariance: *covariance,
        };

        let mut payloads = Vec::with_capacity(5);
        if cfg.publish_pose {
            payloads.push(EventPayload::Pose2D(Pose2D {
                x: pose.translation.x,
                y: pose.translation.y,
                theta: pose.yaw(),
            }));
        }
        if cfg.publish_pose_stamped {
            payloads.push(EventPayload::PoseStamped(PoseStamped {
                header: header.clone(),
                pose: msg_pose,
            }));
        }
        if cfg.publish_pose_with_covariance {
            payloads.push(EventPayload::PoseWithCovariance(with_covariance.clone()));
        }
        if cfg.publish_pose_with_covariance_stamped {
            payloads.push(EventPayload::PoseWithCovarianceStamped(
                PoseWithCovarianceStamped {
                    header: header.clone(),
                    pose: with_covariance,
                },
            ));
        }
        if cfg.publish_tf {
            payloads.push(EventPayload::Transform(TransformStamped {
                header,
                child_frame_id: cfg.base_frame.clone(),
                transform: msg_pose,
            }));
        }

        for payload in payloads {
            let topic = Topic::for_payload(&payload);
            if let Err(e) = self.publisher.publish(topic, make_event(EVENT_SOURCE, payload)) {
                warn!(error = %e, ?topic, "failed to publish output");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
