//! `scanmatch-runtime` – the keyframe-relative scan-matching pipeline.
//!
//! Wires the perception steps together around an external alignment solver
//! and publishes the resulting poses.
//!
//! # Modules
//!
//! - [`scan_matcher`] – [`ScanMatcher`][scan_matcher::ScanMatcher]: the
//!   per-reading state machine (initialise → build → predict → align →
//!   integrate → keyframe).
//! - [`frame_chain`] – [`FrameChain`][frame_chain::FrameChain]: cached
//!   sensor ↔ base transform and the conversions between solver-local and
//!   fixed-frame poses.
//! - [`keyframe`] – [`Keyframe`][keyframe::Keyframe] ownership and the
//!   promotion thresholds.
//! - [`solver`] – the [`Aligner`][solver::Aligner] contract any registration
//!   backend implements.
//! - [`config`] – [`ScanMatcherConfig`][config::ScanMatcherConfig], loaded
//!   from TOML with environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs
//!   the subscriber described by the `[telemetry]` config table, with an
//!   optional OTLP span exporter.
//!
//! # Startup
//!
//! ```rust,no_run
//! use std::path::Path;
//! use scanmatch_runtime::{ScanMatcherConfig, init_tracing};
//!
//! let config = ScanMatcherConfig::load_from(Path::new("scanmatch.toml"))
//!     .expect("readable config")
//!     .unwrap_or_default();
//! let _telemetry = init_tracing(&config);
//! // ... build a ScanMatcher from `config` and feed it readings.
//! ```

pub mod config;
pub mod frame_chain;
pub mod keyframe;
pub mod scan_matcher;
pub mod solver;
pub mod telemetry;

pub use config::{LogFormat, ScanMatcherConfig, SolverConfig, TelemetryConfig};
pub use frame_chain::FrameChain;
pub use keyframe::{Keyframe, KeyframePolicy};
pub use scan_matcher::{CycleOutcome, MatchOutput, ScanMatcher};
pub use solver::{Aligner, MatchResult};
pub use telemetry::{TracerProviderGuard, init_tracing};
