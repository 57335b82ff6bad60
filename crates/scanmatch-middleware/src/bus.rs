//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks, so a synchronous pipeline can hand
//! results to async consumers.
//!
//! # Topics
//!
//! Each pipeline output has its own [`Topic`] lane:
//!
//! | Topic | Payload |
//! |---|---|
//! | [`Topic::Pose2D`] | planar `(x, y, θ)` of the base in the fixed frame |
//! | [`Topic::PoseStamped`] | full pose with stamp and fixed frame id |
//! | [`Topic::PoseWithCovariance`] | pose plus 6×6 covariance |
//! | [`Topic::PoseWithCovarianceStamped`] | stamped pose plus covariance |
//! | [`Topic::Transform`] | fixed → base transform broadcast |

use chrono::Utc;
use scanmatch_types::{Event, EventPayload, ScanMatchError};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Pose2D,
    PoseStamped,
    PoseWithCovariance,
    PoseWithCovarianceStamped,
    Transform,
}

impl Topic {
    /// The lane a payload belongs on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Pose2D(_) => Topic::Pose2D,
            EventPayload::PoseStamped(_) => Topic::PoseStamped,
            EventPayload::PoseWithCovariance(_) => Topic::PoseWithCovariance,
            EventPayload::PoseWithCovarianceStamped(_) => Topic::PoseWithCovarianceStamped,
            EventPayload::Transform(_) => Topic::Transform,
        }
    }
}

/// Wrap a payload in a fresh [`Event`] envelope.
pub fn make_event(source: &str, payload: EventPayload) -> Event {
    Event {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        source: source.to_string(),
        payload,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Publisher
// ────────────────────────────────────────────────────────────────────────────

/// Destination for pipeline outputs.
///
/// The pipeline only depends on this trait, so any transport can stand in
/// for the in-process [`EventBus`].
pub trait Publisher: Send + Sync {
    /// Deliver `event` on `topic`, returning how many consumers received it.
    fn publish(&self, topic: Topic, event: Event) -> Result<usize, ScanMatchError>;
}

// ────────────────────────────────────────────────────────────────────────────
// EventBus
// ────────────────────────────────────────────────────────────────────────────

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    pose2d: broadcast::Sender<Event>,
    pose_stamped: broadcast::Sender<Event>,
    pose_with_covariance: broadcast::Sender<Event>,
    pose_with_covariance_stamped: broadcast::Sender<Event>,
    transform: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently and
    /// must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        let (pose2d, _) = broadcast::channel(capacity);
        let (pose_stamped, _) = broadcast::channel(capacity);
        let (pose_with_covariance, _) = broadcast::channel(capacity);
        let (pose_with_covariance_stamped, _) = broadcast::channel(capacity);
        let (transform, _) = broadcast::channel(capacity);
        Self {
            pose2d,
            pose_stamped,
            pose_with_covariance,
            pose_with_covariance_stamped,
            transform,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when no subscribers are currently listening on the
    /// topic; outputs are fire-and-forget.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ScanMatchError> {
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => {
                trace!(?topic, "no subscribers, event dropped");
                Ok(0)
            }
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Pose2D => &self.pose2d,
            Topic::PoseStamped => &self.pose_stamped,
            Topic::PoseWithCovariance => &self.pose_with_covariance,
            Topic::PoseWithCovarianceStamped => &self.pose_with_covariance_stamped,
            Topic::Transform => &self.transform,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Publisher for EventBus {
    fn publish(&self, topic: Topic, event: Event) -> Result<usize, ScanMatchError> {
        self.publish_to(topic, event)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TopicReceiver
// ────────────────────────────────────────────────────────────────────────────

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for synchronous consumers and tests.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
