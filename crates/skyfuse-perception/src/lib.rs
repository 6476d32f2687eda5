//! `skyfuse-perception` – the fusion core.
//!
//! Turns the asynchronous sensor streams of the aircraft into frame-consistent
//! obstacle point sets.
//!
//! # Modules
//!
//! - [`rotation`] – Euler angles → body-to-world rotation matrix, and point-set
//!   transforms built on it.
//! - [`transform`] – [`FrameService`][transform::FrameService] and the
//!   [`TfEngine`][transform::TfEngine] frame graph that implements it.
//! - [`slot`] – [`LatestSlot`][slot::LatestSlot]: replace-under-lock,
//!   copy-out latest-value cell.
//! - [`state_store`] – [`SensorStateStore`][state_store::SensorStateStore]:
//!   per-channel latest attitude / GPS / baro-airspeed samples.
//! - [`stereo`] – decoding stereo observations into
//!   [`StereoFrame`][stereo::StereoFrame]s and pixel-box filtering.
//! - [`review_log`] – the `video,frame[,index]*` reviewed-frame log line.
//! - [`octree`] – [`OccupancyOctree`][octree::OccupancyOctree]: OctoMap-compatible
//!   probabilistic octree codec with maximum-likelihood collapse.
//! - [`occupancy`] – [`OccupancyMap`][occupancy::OccupancyMap]: the single live
//!   map, replaced wholesale on every update.
//! - [`fusion`] – [`ObstacleFusionEngine`][fusion::ObstacleFusionEngine]: the
//!   per-stereo-frame fusion pass.

pub mod fusion;
pub mod occupancy;
pub mod octree;
pub mod review_log;
pub mod rotation;
pub mod slot;
pub mod state_store;
pub mod stereo;
pub mod transform;

pub use nalgebra::{Matrix3, Point3, Vector3};
