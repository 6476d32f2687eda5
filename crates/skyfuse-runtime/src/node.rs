//! [`FusionNode`] – the process-wide context object.
//!
//! The node owns every piece of shared state (sensor store, occupancy map,
//! per-channel stereo slots, replay position) and the dispatcher that feeds
//! them from the [`EventBus`].  Each loop iteration runs three steps:
//!
//! 1. **Drain** – wait at most `drain_wait` for bus traffic and hand
//!    everything pending to the slot handlers;
//! 2. **Map** – if a new occupancy update is queued and no decode is running,
//!    decode it on the blocking pool; the map is swapped in when it is done;
//! 3. **Fuse** – if a new primary stereo frame arrived, run one
//!    [`ObstacleFusionEngine`] pass over it and hand the result to the sink.
//!
//! Handlers only replace slot contents.  Occupancy decoding never runs on
//! the dispatch path, so a large map does not hold up fusion; only the
//! newest queued update is decoded.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skyfuse_middleware::EventBus;
//! use skyfuse_perception::fusion::LoggingSink;
//! use skyfuse_perception::transform::TfEngine;
//! use skyfuse_runtime::{FusionNode, NodeConfig};
//!
//! # async fn demo() -> Result<(), skyfuse_types::FusionError> {
//! let bus = EventBus::default();
//! let mut node = FusionNode::new(&bus, Arc::new(TfEngine::new()), NodeConfig::default());
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! node.run(&LoggingSink, shutdown).await
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use skyfuse_middleware::{Dispatcher, EventBus, EventHandler, Topic};
use skyfuse_perception::fusion::{FusionConfig, ObstacleFusionEngine, ObstacleSink};
use skyfuse_perception::occupancy::OccupancyMap;
use skyfuse_perception::slot::LatestSlot;
use skyfuse_perception::state_store::SensorStateStore;
use skyfuse_perception::stereo::{StereoFrame, parse_stereo_message};
use skyfuse_perception::transform::FrameService;
use skyfuse_types::{
    Event, EventPayload, FusionError, OccupancyUpdate, ReplayRequest, ReviewBox, StereoChannel,
    StereoObservation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::review::ReviewRecorder;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub fusion: FusionConfig,
    /// Longest the drain step may block waiting for traffic.
    pub drain_wait: Duration,
    /// Expected occupancy resolution; a differing map is still accepted.
    pub map_resolution: f64,
    pub review_log: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            drain_wait: Duration::from_millis(1),
            map_resolution: 0.5,
            review_log: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state + handlers
// ─────────────────────────────────────────────────────────────────────────────

struct NodeState {
    sensors: Arc<SensorStateStore>,
    map: Arc<OccupancyMap>,
    stereo: LatestSlot<Arc<StereoFrame>>,
    stereo_bm: LatestSlot<Arc<StereoFrame>>,
    position: LatestSlot<ReplayRequest>,
    /// Newest occupancy update not yet handed to a decode job.
    pending_map: LatestSlot<Arc<OccupancyUpdate>>,
    recorder: ReviewRecorder,
}

impl NodeState {
    fn slot(&self, channel: StereoChannel) -> &LatestSlot<Arc<StereoFrame>> {
        match channel {
            StereoChannel::Primary => &self.stereo,
            StereoChannel::BlockMatching => &self.stereo_bm,
        }
    }

    fn on_stereo(&self, channel: StereoChannel, observation: &StereoObservation) {
        match parse_stereo_message(observation) {
            Ok(frame) => {
                debug!(?channel, frame = frame.frame_number, points = frame.len(), "stereo frame");
                self.slot(channel).store(Arc::new(frame));
            }
            Err(e) => warn!(?channel, error = %e, "stereo message dropped"),
        }
    }

    fn on_review(&self, review: &ReviewBox) {
        let Some(frame) = self.stereo_bm.latest() else {
            debug!("review box without a block-matching frame; ignored");
            return;
        };
        if let Err(e) = self
            .recorder
            .record(&frame, self.position.latest(), review)
        {
            warn!(error = %e, "review not recorded");
        }
    }
}

impl EventHandler for NodeState {
    fn handle(&self, event: &Event) {
        match &event.payload {
            EventPayload::Attitude(sample) => self.sensors.update_attitude(*sample),
            EventPayload::Gps(sample) => self.sensors.update_gps(*sample),
            EventPayload::BaroAirspeed(sample) => self.sensors.update_baro_airspeed(*sample),
            EventPayload::Stereo {
                channel,
                observation,
            } => self.on_stereo(*channel, observation),
            EventPayload::Occupancy(update) => {
                debug!(
                    timestamp = update.timestamp,
                    bytes = update.data.len(),
                    "occupancy update queued"
                );
                self.pending_map.store(Arc::new(update.clone()));
            }
            EventPayload::Replay(position) => {
                debug!(
                    video = position.video_number,
                    frame = position.frame_number,
                    "replay position"
                );
                self.position.store(*position);
            }
            EventPayload::Review(review) => self.on_review(review),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FusionNode
// ─────────────────────────────────────────────────────────────────────────────

pub struct FusionNode {
    state: Arc<NodeState>,
    engine: ObstacleFusionEngine,
    dispatcher: Dispatcher,
    drain_wait: Duration,
    map_resolution: f64,
    /// Generation of the last primary frame handed to the engine.
    last_fused: u64,
    /// Generation of the last occupancy update handed to a decode job.
    map_seen: u64,
    map_job: Option<JoinHandle<()>>,
}

impl FusionNode {
    /// Build the node and subscribe it to every topic on `bus`.
    pub fn new(bus: &EventBus, frames: Arc<dyn FrameService>, config: NodeConfig) -> Self {
        let sensors = Arc::new(SensorStateStore::new());
        let map = Arc::new(OccupancyMap::new());
        let state = Arc::new(NodeState {
            sensors: Arc::clone(&sensors),
            map: Arc::clone(&map),
            stereo: LatestSlot::new(),
            stereo_bm: LatestSlot::new(),
            position: LatestSlot::new(),
            pending_map: LatestSlot::new(),
            recorder: ReviewRecorder::new(bus.clone(), config.review_log.clone()),
        });

        let mut dispatcher = Dispatcher::new(bus);
        for topic in Topic::ALL {
            dispatcher.route(topic, Arc::clone(&state) as Arc<dyn EventHandler>);
        }

        let engine = ObstacleFusionEngine::new(sensors, map, frames, config.fusion);
        Self {
            state,
            engine,
            dispatcher,
            drain_wait: config.drain_wait,
            map_resolution: config.map_resolution,
            last_fused: 0,
            map_seen: 0,
            map_job: None,
        }
    }

    pub fn sensors(&self) -> &Arc<SensorStateStore> {
        &self.state.sensors
    }

    pub fn map(&self) -> &Arc<OccupancyMap> {
        &self.state.map
    }

    pub fn latest_stereo(&self, channel: StereoChannel) -> Option<Arc<StereoFrame>> {
        self.state.slot(channel).latest()
    }

    /// The (video, frame) last announced on the replay channel.
    pub fn replay_position(&self) -> Option<ReplayRequest> {
        self.state.position.latest()
    }

    /// Drain pending bus traffic, waiting at most the configured drain wait.
    pub async fn drain(&mut self) -> usize {
        self.dispatcher.drain(self.drain_wait).await
    }

    /// Start decoding the newest queued occupancy update unless a decode is
    /// still running.  A finished job is reaped first.
    pub async fn service_map(&mut self) {
        if let Some(job) = self.map_job.take_if(|job| job.is_finished()) {
            join_map_job(job).await;
        }
        if self.map_job.is_some() {
            return;
        }
        let Some((generation, update)) = self.state.pending_map.newer_than(self.map_seen) else {
            return;
        };
        self.map_seen = generation;
        let map = Arc::clone(&self.state.map);
        let resolution = self.map_resolution;
        self.map_job = Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = map.ingest_update(&update, resolution) {
                warn!(error = %e, "occupancy update rejected; keeping current map");
            }
        }));
    }

    /// Wait until every queued occupancy update has been installed or
    /// rejected.
    pub async fn flush_map(&mut self) {
        loop {
            if let Some(job) = self.map_job.take() {
                join_map_job(job).await;
            }
            self.service_map().await;
            if self.map_job.is_none() {
                return;
            }
        }
    }

    /// Fuse the newest primary stereo frame if it has not been fused yet.
    ///
    /// Returns `true` when a result was handed to `sink`.
    pub fn fuse_latest(&mut self, sink: &dyn ObstacleSink) -> bool {
        let Some((generation, frame)) = self.state.stereo.newer_than(self.last_fused) else {
            return false;
        };
        self.last_fused = generation;
        self.engine.fuse_into(&frame, sink)
    }

    /// One drain + map + fuse iteration.
    pub async fn step(&mut self, sink: &dyn ObstacleSink) -> bool {
        self.drain().await;
        self.service_map().await;
        self.fuse_latest(sink)
    }

    /// Loop until `shutdown` reads `true` or the bus goes away, then release
    /// everything.
    pub async fn run(
        &mut self,
        sink: &dyn ObstacleSink,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), FusionError> {
        info!(topics = ?self.dispatcher.topics(), "fusion node running");
        while !*shutdown.borrow() {
            self.step(sink).await;
            if self.dispatcher.is_closed() {
                warn!("event bus closed");
                break;
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Unsubscribe from every topic, wait for a running map decode, then
    /// release the map and stereo frames.  Queued updates are discarded.
    pub async fn shutdown(&mut self) {
        self.dispatcher.unsubscribe_all();
        if let Some(job) = self.map_job.take() {
            join_map_job(job).await;
        }
        self.state.pending_map.clear();
        self.state.map.clear();
        self.state.stereo.clear();
        self.state.stereo_bm.clear();
        info!("fusion node stopped");
    }
}

async fn join_map_job(job: JoinHandle<()>) {
    if let Err(e) = job.await {
        warn!(error = %e, "occupancy decode task failed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
