//! `scanmatch-perception` – geometry and the per-reading estimation steps.
//!
//! Everything here is synchronous and independent of how readings arrive or
//! where results go.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D] and
//!   [`RigidTransform2D`][transform::RigidTransform2D]: rigid-body poses,
//!   composition and planar projection.
//! - [`tf_buffer`] – [`TfBuffer`][tf_buffer::TfBuffer]: time-stamped frame
//!   graph answering relative-pose queries through the
//!   [`FrameLookup`][tf_buffer::FrameLookup] trait.
//! - [`point_set`] – converts scans and clouds into the polar
//!   [`PointSet`][point_set::PointSet] the alignment solver consumes.
//! - [`fusion`] – [`PredictionFusion`][fusion::PredictionFusion]: merges
//!   velocity, odometry, orientation and frame lookups into one motion guess.
//! - [`covariance`] – projects the solver's uncertainty into the output
//!   frame.

pub mod covariance;
pub mod fusion;
pub mod point_set;
pub mod tf_buffer;
pub mod transform;
