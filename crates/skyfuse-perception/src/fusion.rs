//! Obstacle Fusion Engine.
//!
//! Reactive orchestrator run once per primary stereo frame:
//!
//! 1. copy out a [`SensorSnapshot`] (attitude is required);
//! 2. build the body-to-world rotation from the snapshotted attitude;
//! 3. rotate the frame's sensor-frame points by it and offset them by the
//!    body origin's position in the map frame;
//! 4. query the [`OccupancyMap`] for the same (map) frame;
//! 5. hand both point sets to an [`ObstacleSink`].
//!
//! Both point sets therefore come out in `map_frame`: an obstacle seen by
//! the stereo camera and stored in the map lands on the same coordinates.
//!
//! No lock is held while transforms run: each store hands out a copy (or an
//! `Arc`) and the math happens afterwards.  The engine keeps no state between
//! passes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use skyfuse_perception::fusion::{FusionConfig, ObstacleFusionEngine};
//! use skyfuse_perception::occupancy::OccupancyMap;
//! use skyfuse_perception::state_store::SensorStateStore;
//! use skyfuse_perception::stereo::StereoFrame;
//! use skyfuse_perception::transform::TfEngine;
//! use skyfuse_perception::Point3;
//! use skyfuse_types::AttitudeSample;
//!
//! let sensors = Arc::new(SensorStateStore::new());
//! let engine = ObstacleFusionEngine::new(
//!     Arc::clone(&sensors),
//!     Arc::new(OccupancyMap::new()),
//!     Arc::new(TfEngine::new()),
//!     FusionConfig::default(),
//! );
//!
//! let frame = StereoFrame {
//!     timestamp: 1, video_number: 0, frame_number: 0,
//!     points: vec![Point3::new(1.0, 0.0, 0.0)], pixels: None,
//! };
//! // Nothing to fuse until the first attitude arrives.
//! assert!(engine.fuse(&frame).is_none());
//!
//! sensors.update_attitude(AttitudeSample { timestamp: 1, roll: 0.0, pitch: 0.0, yaw: 0.0 });
//! let fused = engine.fuse(&frame).unwrap();
//! assert_eq!(fused.stereo_points, frame.points);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, info_span, warn};

use crate::occupancy::OccupancyMap;
use crate::rotation::{rotation_from_euler, transform_points};
use crate::state_store::{SensorSnapshot, SensorStateStore};
use crate::stereo::StereoFrame;
use crate::transform::FrameService;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Frame the occupancy map's cell centres are expressed in; every fused
    /// point set is produced in it.
    pub map_frame: String,
    /// Frame of the stereo sensor.  Only its origin (looked up in
    /// `map_frame`) is used; orientation comes from the attitude sample.
    pub body_frame: String,
    /// A pass slower than this is logged as an overrun (one 120 Hz period).
    pub latency_budget: Duration,
    /// Skip free cells when querying the map.
    pub exclude_free: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            map_frame: "local".to_string(),
            body_frame: "body".to_string(),
            latency_budget: Duration::from_micros(8_300),
            exclude_free: true,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output type
// ────────────────────────────────────────────────────────────────────────────

/// Everything one fusion pass produced, all in the map frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedObstacles {
    pub timestamp: i64,
    pub video_number: i32,
    pub frame_number: i32,
    /// The sensor samples the pass was computed from.
    pub snapshot: SensorSnapshot,
    pub rotation: Matrix3<f32>,
    pub stereo_points: Vec<Point3<f32>>,
    pub map_points: Vec<Point3<f32>>,
    pub elapsed: Duration,
}

/// Consumer of fused point sets (avoidance logic, rendering, recording).
pub trait ObstacleSink: Send + Sync {
    fn consume(&self, fused: &FusedObstacles);
}

/// Sink that only logs what it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl ObstacleSink for LoggingSink {
    fn consume(&self, fused: &FusedObstacles) {
        debug!(
            video = fused.video_number,
            frame = fused.frame_number,
            stereo_points = fused.stereo_points.len(),
            map_points = fused.map_points.len(),
            elapsed_us = fused.elapsed.as_micros() as u64,
            "fused obstacles"
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ObstacleFusionEngine
// ────────────────────────────────────────────────────────────────────────────

pub struct ObstacleFusionEngine {
    sensors: Arc<SensorStateStore>,
    map: Arc<OccupancyMap>,
    frames: Arc<dyn FrameService>,
    config: FusionConfig,
}

impl ObstacleFusionEngine {
    pub fn new(
        sensors: Arc<SensorStateStore>,
        map: Arc<OccupancyMap>,
        frames: Arc<dyn FrameService>,
        config: FusionConfig,
    ) -> Self {
        Self {
            sensors,
            map,
            frames,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Run one pass over `frame`.
    ///
    /// Returns `None` when no attitude sample has arrived yet.
    pub fn fuse(&self, frame: &StereoFrame) -> Option<FusedObstacles> {
        let span = info_span!(
            "fusion_pass",
            video = frame.video_number,
            frame = frame.frame_number
        );
        let _enter = span.enter();
        let started = Instant::now();

        let snapshot = self.sensors.snapshot();
        let Some(attitude) = snapshot.attitude else {
            debug!("no attitude yet; skipping fusion");
            return None;
        };

        let rotation = rotation_from_euler(attitude.roll, attitude.pitch, attitude.yaw);
        let origin = self.body_origin();
        let stereo_points = transform_points(&frame.points, &rotation, &origin);
        let map_points = self.map.query_points(
            self.frames.as_ref(),
            &self.config.map_frame,
            &self.config.map_frame,
            self.config.exclude_free,
        );

        let elapsed = started.elapsed();
        if elapsed > self.config.latency_budget {
            warn!(
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = self.config.latency_budget.as_micros() as u64,
                "fusion pass exceeded latency budget"
            );
        }

        Some(FusedObstacles {
            timestamp: frame.timestamp,
            video_number: frame.video_number,
            frame_number: frame.frame_number,
            snapshot,
            rotation,
            stereo_points,
            map_points,
            elapsed,
        })
    }

    /// Position of the body origin in the map frame; the map origin when the
    /// frame service does not know the body yet.
    fn body_origin(&self) -> Vector3<f32> {
        match self
            .frames
            .lookup(&self.config.body_frame, &self.config.map_frame)
        {
            Some(tf) => tf.translation,
            None => {
                debug!(
                    body_frame = %self.config.body_frame,
                    map_frame = %self.config.map_frame,
                    "body position unknown; using map origin"
                );
                Vector3::zeros()
            }
        }
    }

    /// [`fuse`][Self::fuse] and forward the result to `sink`.
    pub fn fuse_into(&self, frame: &StereoFrame, sink: &dyn ObstacleSink) -> bool {
        match self.fuse(frame) {
            Some(fused) => {
                sink.consume(&fused);
                true
            }
            None => false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
