//! The transport adapter seam.
//!
//! skyfuse never talks to the aircraft's message transport directly.  It
//! publishes to and subscribes from its internal
//! [`EventBus`][crate::bus::EventBus]; adapters translate between the bus
//! and the outside world.
//!
//! - [`MessageAdapter`] – the trait every adapter implements.
//! - [`UdpJsonAdapter`][crate::udp_adapter::UdpJsonAdapter] – JSON datagrams
//!   over UDP.

use async_trait::async_trait;
use skyfuse_types::{Event, FusionError};
use tokio::sync::watch;

/// Every external-transport adapter must implement this trait.
///
/// # Contract
///
/// * `run` – receive inbound traffic, publish it on the bus and forward
///   outbound events, until `shutdown` flips to `true`.
/// * `forward` – deliver one outbound event (e.g. a replay-frame request) to
///   the outside world.
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), FusionError>;

    async fn forward(&self, event: &Event) -> Result<(), FusionError>;
}
