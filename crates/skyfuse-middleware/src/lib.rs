//! `skyfuse-middleware` – message plumbing
//!
//! Moves sensor traffic between the aircraft's transport and the fusion
//! node without caring about what the messages mean.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`dispatch`] – routes bus topics to handlers with a bounded-wait drain
//!   step for frame-paced consumers.
//! - [`adapter`] – the [`MessageAdapter`] seam between the bus and an
//!   external transport.
//! - [`udp_adapter`] – JSON-over-UDP ingest and replay-request forwarding.

pub mod adapter;
pub mod bus;
pub mod dispatch;
pub mod udp_adapter;

pub use adapter::MessageAdapter;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use dispatch::{Dispatcher, EventHandler};
pub use udp_adapter::{ChannelMap, UdpJsonAdapter, MAX_OCCUPANCY_BYTES, MAX_STEREO_POINTS};
