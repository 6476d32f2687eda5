//! UDP JSON ingest adapter.
//!
//! [`UdpJsonAdapter`] listens on a UDP socket for datagrams of the form
//!
//! ```json
//! {"channel": "ATTITUDE", "message": {"timestamp": 1, "roll": 0.0, "pitch": 0.1, "yaw": 0.0}}
//! ```
//!
//! resolves `channel` through a [`ChannelMap`], decodes `message` into the
//! matching wire type and publishes it on the [`EventBus`].  Replay-frame
//! requests produced locally travel the other way: they are serialised into
//! the same envelope and sent to the configured replay target.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfuse_types::{
    AttitudeSample, BaroAirspeedSample, Event, EventPayload, FusionError, GpsSample,
    OccupancyUpdate, ReplayRequest, ReviewBox, StereoChannel, StereoObservation,
};
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::MessageAdapter;
use crate::bus::{EventBus, Topic};

/// Largest stereo observation accepted.
pub const MAX_STEREO_POINTS: usize = 65_536;
/// Receive buffer: the largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;
/// Largest occupancy payload accepted.  Bounded by the transport: a JSON
/// byte array spends at least two characters per byte, so a single datagram
/// never reaches this.  Larger maps need a stream transport.  The limit still
/// applies to envelopes handed to [`UdpJsonAdapter::ingest_json`] directly.
pub const MAX_OCCUPANCY_BYTES: usize = MAX_DATAGRAM;

/// Events whose source starts with this prefix came in through this adapter
/// and are never sent back out.
const SOURCE_PREFIX: &str = "skyfuse-middleware::udp/";

/// Channel names used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub attitude: String,
    pub gps: String,
    pub baro_airspeed: String,
    pub stereo: String,
    pub stereo_bm: String,
    pub occupancy: String,
    pub replay: String,
    pub review: String,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            attitude: "attitude".to_string(),
            gps: "gps".to_string(),
            baro_airspeed: "baro-airspeed".to_string(),
            stereo: "stereo".to_string(),
            stereo_bm: "stereo_bm".to_string(),
            occupancy: "octomap".to_string(),
            replay: "stereo_replay".to_string(),
            review: "review_box".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Attitude,
    Gps,
    BaroAirspeed,
    Stereo(StereoChannel),
    Occupancy,
    Replay,
    Review,
}

impl ChannelMap {
    fn resolve(&self, name: &str) -> Option<ChannelKind> {
        let kind = if name == self.attitude {
            ChannelKind::Attitude
        } else if name == self.gps {
            ChannelKind::Gps
        } else if name == self.baro_airspeed {
            ChannelKind::BaroAirspeed
        } else if name == self.stereo {
            ChannelKind::Stereo(StereoChannel::Primary)
        } else if name == self.stereo_bm {
            ChannelKind::Stereo(StereoChannel::BlockMatching)
        } else if name == self.occupancy {
            ChannelKind::Occupancy
        } else if name == self.replay {
            ChannelKind::Replay
        } else if name == self.review {
            ChannelKind::Review
        } else {
            return None;
        };
        Some(kind)
    }
}

/// The datagram wrapper.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    channel: String,
    message: serde_json::Value,
}

pub struct UdpJsonAdapter {
    bus: Arc<EventBus>,
    socket: UdpSocket,
    channels: ChannelMap,
    /// Where outbound replay requests go; `None` disables forwarding.
    replay_target: Option<SocketAddr>,
}

impl UdpJsonAdapter {
    /// Bind the ingest socket on `addr`.
    pub async fn bind(
        bus: Arc<EventBus>,
        addr: SocketAddr,
        channels: ChannelMap,
        replay_target: Option<SocketAddr>,
    ) -> Result<Self, FusionError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| FusionError::Channel(format!("udp bind error on {addr}: {e}")))?;
        Ok(Self {
            bus,
            socket,
            channels,
            replay_target,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FusionError> {
        self.socket
            .local_addr()
            .map_err(|e| FusionError::Channel(e.to_string()))
    }

    /// Decode one JSON envelope and publish it.  Returns the topic it went to.
    pub fn ingest_json(&self, text: &str) -> Result<Topic, FusionError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| FusionError::Parsing(format!("bad envelope: {e}")))?;
        let kind = self
            .channels
            .resolve(&envelope.channel)
            .ok_or_else(|| FusionError::Channel(format!("unknown channel '{}'", envelope.channel)))?;

        let payload = decode_payload(kind, envelope.message)?;
        let topic = Topic::of(&payload);
        let event = Event::new(format!("{SOURCE_PREFIX}{}", envelope.channel), payload);
        if let Err(e) = self.bus.publish(event) {
            debug!(channel = %envelope.channel, error = %e, "no listener for ingested message");
        }
        Ok(topic)
    }

    fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) {
        let text = match std::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                warn!(peer = %peer, len = bytes.len(), "non-UTF-8 datagram dropped");
                return;
            }
        };
        if let Err(e) = self.ingest_json(text) {
            warn!(peer = %peer, error = %e, "datagram dropped");
        }
    }
}

fn decode_payload(kind: ChannelKind, message: serde_json::Value) -> Result<EventPayload, FusionError> {
    fn parse<T: serde::de::DeserializeOwned>(message: serde_json::Value) -> Result<T, FusionError> {
        serde_json::from_value(message).map_err(|e| FusionError::Parsing(e.to_string()))
    }

    let payload = match kind {
        ChannelKind::Attitude => EventPayload::Attitude(parse::<AttitudeSample>(message)?),
        ChannelKind::Gps => EventPayload::Gps(parse::<GpsSample>(message)?),
        ChannelKind::BaroAirspeed => {
            EventPayload::BaroAirspeed(parse::<BaroAirspeedSample>(message)?)
        }
        ChannelKind::Stereo(channel) => {
            let observation = parse::<StereoObservation>(message)?;
            let largest = [observation.x.len(), observation.y.len(), observation.z.len()]
                .into_iter()
                .max()
                .unwrap_or(0);
            if largest > MAX_STEREO_POINTS || observation.number_of_points as i64 > MAX_STEREO_POINTS as i64 {
                return Err(FusionError::MalformedStereo {
                    frame_number: observation.frame_number,
                    details: format!("more than {MAX_STEREO_POINTS} points"),
                });
            }
            EventPayload::Stereo {
                channel,
                observation,
            }
        }
        ChannelKind::Occupancy => {
            let update = parse::<OccupancyUpdate>(message)?;
            if update.data.len() > MAX_OCCUPANCY_BYTES {
                return Err(FusionError::Parsing(format!(
                    "occupancy payload of {} bytes exceeds {MAX_OCCUPANCY_BYTES}",
                    update.data.len()
                )));
            }
            EventPayload::Occupancy(update)
        }
        ChannelKind::Replay => EventPayload::Replay(parse::<ReplayRequest>(message)?),
        ChannelKind::Review => EventPayload::Review(parse::<ReviewBox>(message)?),
    };
    Ok(payload)
}

#[async_trait]
impl MessageAdapter for UdpJsonAdapter {
    fn name(&self) -> &str {
        "udp-json"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FusionError> {
        let mut outbound = self.bus.subscribe_to(Topic::Replay);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!(addr = ?self.socket.local_addr().ok(), "udp ingest listening");

        while !*shutdown.borrow() {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                        Err(e) => warn!(error = %e, "udp receive error"),
                    }
                }
                event = outbound.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = self.forward(&event).await {
                                warn!(error = %e, "replay request not forwarded");
                            }
                        }
                        Err(RecvError::Lagged(n)) => warn!(lagged_by = n, "udp forwarder lagged"),
                        Err(RecvError::Closed) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("udp ingest stopped");
        Ok(())
    }

    /// Send a locally produced replay request to the replay target.
    ///
    /// Events that arrived through this adapter, and non-replay events, are
    /// ignored.
    async fn forward(&self, event: &Event) -> Result<(), FusionError> {
        let EventPayload::Replay(request) = &event.payload else {
            return Ok(());
        };
        if event.source.starts_with(SOURCE_PREFIX) {
            return Ok(());
        }
        let Some(target) = self.replay_target else {
            debug!(?request, "no replay target configured");
            return Ok(());
        };

        let envelope = Envelope {
            channel: self.channels.replay.clone(),
            message: serde_json::to_value(request)
                .map_err(|e| FusionError::Parsing(e.to_string()))?,
        };
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| FusionError::Parsing(e.to_string()))?;
        self.socket
            .send_to(&bytes, target)
            .await
            .map_err(|e| FusionError::Channel(format!("udp send to {target}: {e}")))?;
        debug!(%target, ?request, "replay request forwarded");
        Ok(())
    }
}
