//! Transform Frame (TF) buffer.
//!
//! Maintains a tree of named reference frames and the time-stamped
//! [`Transform3D`]s that relate them.  Given any two frame names and a time,
//! the buffer finds the chain of edges connecting them (walking parent→child
//! edges forwards and child→parent edges through their inverse), samples
//! each edge at the requested time, and composes the result.
//!
//! Dynamic edges keep a bounded, time-ordered history and are interpolated
//! between bracketing samples; requests outside the buffered range are
//! refused rather than extrapolated.  Static edges are valid at all times.
//!
//! Lookups block on a condition variable until the chain becomes available
//! or the caller's timeout expires.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use scanmatch_perception::tf_buffer::{FrameLookup, TfBuffer};
//! use scanmatch_perception::transform::Transform3D;
//!
//! let tf = TfBuffer::new();
//! tf.set_static_transform("base_link", "laser", Transform3D::from_xy_theta(0.2, 0.0, 0.0));
//!
//! let t = tf.lookup("base_link", "laser", None, Duration::ZERO).unwrap();
//! assert!((t.translation.x - 0.2).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use scanmatch_types::{ScanMatchError, Stamp, TransformStamped};
use tracing::debug;

use crate::transform::Transform3D;

/// Number of samples kept per dynamic edge.
pub const DEFAULT_HISTORY_LEN: usize = 100;

// ────────────────────────────────────────────────────────────────────────────
// FrameLookup
// ────────────────────────────────────────────────────────────────────────────

/// Relative-pose queries between named frames.
///
/// Any transform-tree implementation can stand behind this trait; the
/// pipeline only depends on the contract.
pub trait FrameLookup: Send + Sync {
    /// Pose of `child` expressed in `parent` at time `at` (`None` = latest
    /// available), waiting at most `timeout` for it to become available.
    fn lookup(
        &self,
        parent: &str,
        child: &str,
        at: Option<Stamp>,
        timeout: Duration,
    ) -> Result<Transform3D, ScanMatchError>;

    /// Pose of `frame_b` at `time_b` expressed in `frame_a` at `time_a`,
    /// using `fixed` as the frame that does not move between the two times.
    ///
    /// Both underlying lookups share a single `timeout` budget.
    fn lookup_between(
        &self,
        frame_a: &str,
        time_a: Stamp,
        frame_b: &str,
        time_b: Stamp,
        fixed: &str,
        timeout: Duration,
    ) -> Result<Transform3D, ScanMatchError> {
        let deadline = Instant::now().checked_add(timeout);
        let fixed_a = self.lookup(fixed, frame_a, Some(time_a), timeout)?;
        let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
        let fixed_b = self.lookup(fixed, frame_b, Some(time_b), remaining)?;
        Ok(fixed_a.inverse().compose(fixed_b))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Edge storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum EdgeHistory {
    Static(Transform3D),
    Dynamic(VecDeque<(Stamp, Transform3D)>),
}

impl EdgeHistory {
    fn sample(&self, at: Option<Stamp>) -> Option<Transform3D> {
        let history = match self {
            EdgeHistory::Static(t) => return Some(*t),
            EdgeHistory::Dynamic(history) => history,
        };
        let Some(at) = at else {
            return history.back().map(|(_, t)| *t);
        };

        let idx = history.partition_point(|(stamp, _)| *stamp < at);
        if let Some((stamp, t)) = history.get(idx)
            && *stamp == at
        {
            return Some(*t);
        }
        if idx == 0 || idx >= history.len() {
            return None;
        }

        let (s0, t0) = history[idx - 1];
        let (s1, t1) = history[idx];
        let span = (s1 - s0).num_nanoseconds()? as f64;
        let offset = (at - s0).num_nanoseconds()? as f64;
        Some(t0.interpolate(t1, offset / span))
    }

    fn insert(&mut self, stamp: Stamp, transform: Transform3D, limit: usize) {
        match self {
            EdgeHistory::Static(_) => *self = EdgeHistory::Dynamic(VecDeque::from([(stamp, transform)])),
            EdgeHistory::Dynamic(history) => {
                let idx = history.partition_point(|(s, _)| *s < stamp);
                match history.get_mut(idx) {
                    Some(slot) if slot.0 == stamp => slot.1 = transform,
                    _ => history.insert(idx, (stamp, transform)),
                }
                while history.len() > limit {
                    history.pop_front();
                }
            }
        }
    }
}

/// One step along a frame chain.
enum Hop {
    /// Walk from `parent` down to its `child` (apply the edge).
    Down { parent: String, child: String },
    /// Walk from `child` up to its `parent` (apply the edge inverse).
    Up { parent: String, child: String },
}

#[derive(Debug, Default)]
struct FrameTree {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, EdgeHistory>>,
    /// Each frame has at most one parent.
    parent_of: HashMap<String, String>,
}

impl FrameTree {
    fn attach(&mut self, parent: &str, child: &str) -> &mut HashMap<String, EdgeHistory> {
        if let Some(old_parent) = self.parent_of.get(child)
            && old_parent != parent
        {
            if let Some(children) = self.edges.get_mut(old_parent) {
                children.remove(child);
            }
        }
        self.parent_of.insert(child.to_string(), parent.to_string());
        self.edges.entry(parent.to_string()).or_default()
    }

    fn path(&self, from: &str, to: &str) -> Option<Vec<Hop>> {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut came_from: HashMap<String, (String, bool)> = HashMap::new();

        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }
            let children = self
                .edges
                .get(&current)
                .into_iter()
                .flat_map(|c| c.keys())
                .map(|c| (c.clone(), true));
            let parent = self.parent_of.get(&current).map(|p| (p.clone(), false));

            for (next, downward) in children.chain(parent) {
                if visited.insert(next.clone()) {
                    came_from.insert(next.clone(), (current.clone(), downward));
                    queue.push_back(next);
                }
            }
        }

        if !visited.contains(to) {
            return None;
        }

        let mut hops = Vec::new();
        let mut node = to.to_string();
        while let Some((prev, downward)) = came_from.get(&node) {
            hops.push(if *downward {
                Hop::Down {
                    parent: prev.clone(),
                    child: node.clone(),
                }
            } else {
                Hop::Up {
                    parent: node.clone(),
                    child: prev.clone(),
                }
            });
            node = prev.clone();
        }
        hops.reverse();
        Some(hops)
    }

    fn edge(&self, parent: &str, child: &str) -> Option<&EdgeHistory> {
        self.edges.get(parent)?.get(child)
    }

    fn resolve(&self, parent: &str, child: &str, at: Option<Stamp>) -> Result<Transform3D, ScanMatchError> {
        if parent == child {
            return Ok(Transform3D::identity());
        }

        let hops = self
            .path(parent, child)
            .ok_or_else(|| ScanMatchError::TransformUnavailable {
                parent: parent.to_string(),
                child: child.to_string(),
                details: "frames are not connected".to_string(),
            })?;

        let extrapolation = || ScanMatchError::Extrapolation {
            parent: parent.to_string(),
            child: child.to_string(),
        };

        let mut accumulated = Transform3D::identity();
        for hop in hops {
            let step = match hop {
                Hop::Down { parent, child } => self
                    .edge(&parent, &child)
                    .and_then(|e| e.sample(at))
                    .ok_or_else(extrapolation)?,
                Hop::Up { parent, child } => self
                    .edge(&parent, &child)
                    .and_then(|e| e.sample(at))
                    .ok_or_else(extrapolation)?
                    .inverse(),
            };
            accumulated = accumulated.compose(step);
        }
        Ok(accumulated)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe, time-aware frame tree implementing [`FrameLookup`].
///
/// Writers (`set_transform`, `set_static_transform`) may run on any thread;
/// every write wakes lookups that are waiting for a chain to appear.
#[derive(Debug)]
pub struct TfBuffer {
    tree: Mutex<FrameTree>,
    updated: Condvar,
    history_len: usize,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::with_history(DEFAULT_HISTORY_LEN)
    }
}

impl TfBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer keeping at most `history_len` samples per
    /// dynamic edge.
    pub fn with_history(history_len: usize) -> Self {
        Self {
            tree: Mutex::new(FrameTree::default()),
            updated: Condvar::new(),
            history_len: history_len.max(1),
        }
    }

    /// Record the pose of `child` in `parent` at `stamp`.
    pub fn set_transform(&self, parent: &str, child: &str, stamp: Stamp, transform: Transform3D) {
        {
            let mut tree = self.tree.lock();
            let limit = self.history_len;
            tree.attach(parent, child)
                .entry(child.to_string())
                .and_modify(|e| e.insert(stamp, transform, limit))
                .or_insert_with(|| EdgeHistory::Dynamic(VecDeque::from([(stamp, transform)])));
        }
        self.updated.notify_all();
    }

    /// Record a time-invariant pose of `child` in `parent`, replacing any
    /// history for that edge.
    pub fn set_static_transform(&self, parent: &str, child: &str, transform: Transform3D) {
        {
            let mut tree = self.tree.lock();
            tree.attach(parent, child)
                .insert(child.to_string(), EdgeHistory::Static(transform));
        }
        self.updated.notify_all();
    }

    /// Record a broadcast transform message.
    pub fn set_from_message(&self, msg: &TransformStamped) {
        self.set_transform(
            &msg.header.frame_id,
            &msg.child_frame_id,
            msg.header.stamp,
            Transform3D::from(&msg.transform),
        );
    }

    /// `true` if the chain can be resolved right now without waiting.
    pub fn can_transform(&self, parent: &str, child: &str, at: Option<Stamp>) -> bool {
        self.tree.lock().resolve(parent, child, at).is_ok()
    }
}

impl FrameLookup for TfBuffer {
    fn lookup(
        &self,
        parent: &str,
        child: &str,
        at: Option<Stamp>,
        timeout: Duration,
    ) -> Result<Transform3D, ScanMatchError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(86_400));

        let mut tree = self.tree.lock();
        loop {
            let last_error = match tree.resolve(parent, child, at) {
                Ok(t) => return Ok(t),
                Err(e) => e,
            };
            if timeout.is_zero() {
                return Err(last_error);
            }
            if self.updated.wait_until(&mut tree, deadline).timed_out() {
                return tree.resolve(parent, child, at).map_err(|e| {
                    debug!(parent, child, error = %e, "frame lookup timed out");
                    ScanMatchError::LookupTimeout {
                        parent: parent.to_string(),
                        child: child.to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    }
                });
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quaternion, Vec3};
    use chrono::{TimeDelta, Utc};
    use scanmatch_types::Header;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;
    use std::thread;

    fn tx(x: f64) -> Transform3D {
        Transform3D::new(Vec3::new(x, 0.0, 0.0), Quaternion::identity())
    }

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfBuffer::new();
        let t = tf.lookup("world", "world", None, Duration::ZERO).unwrap();
        assert_eq!(t, Transform3D::identity());
    }

    #[test]
    fn lookup_composed_chain() {
        let tf = TfBuffer::new();
        tf.set_static_transform("world", "base_link", tx(1.0));
        tf.set_static_transform("base_link", "laser", tx(0.5));

        let t = tf.lookup("world", "laser", None, Duration::ZERO).unwrap();
        assert!((t.translation.x - 1.5).abs() < 1e-9);
    }

    #[test]
    fn lookup_walks_edges_in_reverse() {
        let tf = TfBuffer::new();
        tf.set_static_transform("world", "base_link", tx(1.0));
        let t = tf.lookup("base_link", "world", None, Duration::ZERO).unwrap();
        assert!((t.translation.x + 1.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_through_common_ancestor() {
        let tf = TfBuffer::new();
        tf.set_static_transform("base_link", "laser", tx(0.3));
        tf.set_static_transform("base_link", "imu", tx(-0.1));
        let t = tf.lookup("laser", "imu", None, Duration::ZERO).unwrap();
        assert!((t.translation.x + 0.4).abs() < 1e-9);
    }

    #[test]
    fn lookup_unknown_frame_is_unavailable() {
        let tf = TfBuffer::new();
        tf.set_static_transform("world", "base_link", tx(1.0));
        let err = tf.lookup("world", "ghost_frame", None, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ScanMatchError::TransformUnavailable { .. }));
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        let tf = TfBuffer::new();
        tf.set_static_transform(
            "world",
            "base_link",
            Transform3D::new(Vec3::zero(), Quaternion::from_yaw(FRAC_PI_2)),
        );
        tf.set_static_transform("base_link", "camera", tx(1.0));

        let t = tf.lookup("world", "camera", None, Duration::ZERO).unwrap();
        assert!(t.translation.x.abs() < 1e-9, "x={}", t.translation.x);
        assert!((t.translation.y - 1.0).abs() < 1e-9, "y={}", t.translation.y);
    }

    #[test]
    fn dynamic_edge_interpolates_between_samples() {
        let tf = TfBuffer::new();
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::milliseconds(100);
        tf.set_transform("world", "base_link", t0, Transform3D::from_xy_theta(0.0, 0.0, 0.0));
        tf.set_transform("world", "base_link", t1, Transform3D::from_xy_theta(1.0, 0.0, 0.4));

        let mid = t0 + TimeDelta::milliseconds(25);
        let t = tf.lookup("world", "base_link", Some(mid), Duration::ZERO).unwrap();
        assert!((t.translation.x - 0.25).abs() < 1e-9);
        assert!((t.yaw() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn dynamic_edge_refuses_extrapolation() {
        let tf = TfBuffer::new();
        let t0 = Utc::now();
        tf.set_transform("world", "base_link", t0, tx(0.0));
        let later = t0 + TimeDelta::seconds(1);
        let err = tf.lookup("world", "base_link", Some(later), Duration::ZERO).unwrap_err();
        assert!(matches!(err, ScanMatchError::Extrapolation { .. }));

        // Latest is always available once a sample exists.
        assert!(tf.lookup("world", "base_link", None, Duration::ZERO).is_ok());
    }

    #[test]
    fn out_of_order_samples_are_sorted() {
        let tf = TfBuffer::new();
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::milliseconds(10);
        tf.set_transform("world", "base_link", t1, tx(1.0));
        tf.set_transform("world", "base_link", t0, tx(0.0));
        let latest = tf.lookup("world", "base_link", None, Duration::ZERO).unwrap();
        assert!((latest.translation.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded() {
        let tf = TfBuffer::with_history(2);
        let t0 = Utc::now();
        for i in 0..3 {
            tf.set_transform("world", "base_link", t0 + TimeDelta::milliseconds(i), tx(i as f64));
        }
        assert!(!tf.can_transform("world", "base_link", Some(t0)));
        assert!(tf.can_transform("world", "base_link", Some(t0 + TimeDelta::milliseconds(1))));
    }

    #[test]
    fn reparenting_drops_old_edge() {
        let tf = TfBuffer::new();
        tf.set_static_transform("a", "laser", tx(1.0));
        tf.set_static_transform("b", "laser", tx(2.0));
        assert!(!tf.can_transform("a", "laser", None));
        assert!(tf.can_transform("b", "laser", None));
    }

    #[test]
    fn lookup_times_out_when_frame_never_appears() {
        let tf = TfBuffer::new();
        let started = Instant::now();
        let err = tf
            .lookup("base_link", "laser", None, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ScanMatchError::LookupTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn lookup_wakes_when_transform_arrives() {
        let tf = Arc::new(TfBuffer::new());
        let writer = Arc::clone(&tf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set_static_transform("base_link", "laser", tx(0.2));
        });

        let t = tf
            .lookup("base_link", "laser", None, Duration::from_secs(5))
            .unwrap();
        assert!((t.translation.x - 0.2).abs() < 1e-9);
        handle.join().unwrap();
    }

    #[test]
    fn broadcast_message_becomes_dynamic_edge() {
        let tf = TfBuffer::new();
        let t0 = Utc::now();
        let msg = TransformStamped {
            header: Header::new(t0, "odom"),
            child_frame_id: "base_link".to_string(),
            transform: Transform3D::from_xy_theta(2.0, -1.0, 0.5).to_pose(),
        };
        tf.set_from_message(&msg);

        let t = tf.lookup("odom", "base_link", Some(t0), Duration::ZERO).unwrap();
        assert!((t.translation.x - 2.0).abs() < 1e-9);
        assert!((t.translation.y + 1.0).abs() < 1e-9);
        assert!((t.yaw() - 0.5).abs() < 1e-9);
        assert!(!tf.can_transform("odom", "base_link", Some(t0 + TimeDelta::milliseconds(1))));
    }

    #[test]
    fn lookup_between_gives_motion_of_base() {
        let tf = TfBuffer::new();
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::milliseconds(100);
        tf.set_transform("world", "base_link", t0, Transform3D::from_xy_theta(1.0, 1.0, FRAC_PI_2));
        tf.set_transform("world", "base_link", t1, Transform3D::from_xy_theta(1.0, 1.5, FRAC_PI_2));

        let motion = tf
            .lookup_between("base_link", t0, "base_link", t1, "world", Duration::ZERO)
            .unwrap();
        // Moving +y in the world while facing +y is forward motion.
        assert!((motion.translation.x - 0.5).abs() < 1e-9);
        assert!(motion.translation.y.abs() < 1e-9);
        assert!(motion.yaw().abs() < 1e-9);
    }

    #[test]
    fn lookup_between_shares_one_timeout_budget() {
        let tf = Arc::new(TfBuffer::new());
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::milliseconds(100);
        let writer = Arc::clone(&tf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            writer.set_transform("world", "base_link", t0, tx(1.0));
        });

        // The first sample arrives late and the second never does.
        let started = Instant::now();
        let result = tf.lookup_between(
            "base_link",
            t0,
            "base_link",
            t1,
            "world",
            Duration::from_millis(200),
        );
        let elapsed = started.elapsed();
        handle.join().unwrap();

        assert!(result.is_err());
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(300), "waited {elapsed:?}");
    }
}
