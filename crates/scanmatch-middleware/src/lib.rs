//! `scanmatch-middleware` – output routing.
//!
//! Carries pipeline results to whoever is listening without caring about
//! their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels, plus the [`Publisher`][bus::Publisher] trait the
//!   pipeline publishes through.

pub mod bus;

pub use bus::{EventBus, Publisher, Topic, TopicReceiver};
