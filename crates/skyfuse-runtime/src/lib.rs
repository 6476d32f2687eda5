//! `skyfuse-runtime` – the fusion node
//!
//! Wires the perception core to the event bus and drives it.
//!
//! # Modules
//!
//! - [`node`] – [`FusionNode`][node::FusionNode]: the context object that owns
//!   every latest-value slot, routes bus topics into them and runs one fusion
//!   pass per new primary stereo frame.
//! - [`review`] – [`ReviewRecorder`][review::ReviewRecorder]: appends reviewed
//!   frames to the review log and asks the recorder for the next frame.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export `fusion_pass` spans to any
//!   OTLP-compatible collector.

pub mod node;
pub mod review;
pub mod telemetry;

pub use node::{FusionNode, NodeConfig};
pub use review::ReviewRecorder;
