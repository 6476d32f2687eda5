//! Topic-partitioned publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  A slow subscriber loses the oldest buffered events (it sees a
//! `Lagged` error) rather than stalling publishers; for latest-value sensor
//! streams that is exactly the wanted behaviour.
//!
//! # Topics
//!
//! Each inbound channel of the aircraft gets its own [`Topic`] lane:
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Attitude`] | Roll / pitch / yaw samples |
//! | [`Topic::Gps`] | GPS fixes |
//! | [`Topic::BaroAirspeed`] | Barometric altitude and airspeed |
//! | [`Topic::Stereo`] | Stereo point observations (primary and block matching) |
//! | [`Topic::Occupancy`] | Serialised occupancy octrees |
//! | [`Topic::Replay`] | Replay position announcements and frame requests |
//! | [`Topic::Review`] | Reviewer-drawn pixel boxes |
//!
//! A firehose channel additionally carries every event regardless of topic.

use skyfuse_types::{Event, EventPayload, FusionError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Attitude,
    Gps,
    BaroAirspeed,
    Stereo,
    Occupancy,
    Replay,
    Review,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Attitude,
        Topic::Gps,
        Topic::BaroAirspeed,
        Topic::Stereo,
        Topic::Occupancy,
        Topic::Replay,
        Topic::Review,
    ];

    /// The lane a payload travels on.
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::Attitude(_) => Topic::Attitude,
            EventPayload::Gps(_) => Topic::Gps,
            EventPayload::BaroAirspeed(_) => Topic::BaroAirspeed,
            EventPayload::Stereo { .. } => Topic::Stereo,
            EventPayload::Occupancy(_) => Topic::Occupancy,
            EventPayload::Replay(_) => Topic::Replay,
            EventPayload::Review(_) => Topic::Review,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    lanes: [broadcast::Sender<Event>; Topic::ALL.len()],
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            firehose: broadcast::channel(capacity).0,
            lanes: std::array::from_fn(|_| broadcast::channel(capacity).0),
        }
    }

    /// Publish `event` on its payload's topic lane and on the firehose.
    ///
    /// Returns the number of receivers handed the event.  Having no listener
    /// on the lane is not an error as long as someone on the firehose got it.
    pub fn publish(&self, event: Event) -> Result<usize, FusionError> {
        let topic = Topic::of(&event.payload);
        let firehose = self.firehose.send(event.clone()).unwrap_or(0);
        match self.lane(topic).send(event) {
            Ok(n) => Ok(n + firehose),
            Err(_) if firehose > 0 => Ok(firehose),
            Err(_) => Err(FusionError::Channel(format!(
                "No subscribers for topic {topic:?}"
            ))),
        }
    }

    /// Publish `event` to one lane only, bypassing the firehose.
    ///
    /// Fails when nobody listens on `topic` or when the payload belongs to a
    /// different lane.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, FusionError> {
        if Topic::of(&event.payload) != topic {
            return Err(FusionError::Channel(format!(
                "{:?} payload published to topic {topic:?}",
                Topic::of(&event.payload)
            )));
        }
        self.lane(topic)
            .send(event)
            .map_err(|_| FusionError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a single [`Topic`] lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.lane(topic).subscribe(),
        }
    }

    /// Subscribe to every event on the bus.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    /// Live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.lane(topic).receiver_count()
    }

    fn lane(&self, topic: Topic) -> &broadcast::Sender<Event> {
        &self.lanes[topic.index()]
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] lane.
///
/// Obtained via [`EventBus::subscribe_to`]; dropping it unsubscribes.
#[derive(Debug)]
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – `n` events were dropped for this
    ///   subscriber; the next call resumes with the oldest one still held.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
