//! Event dispatch with a bounded-wait drain step.
//!
//! A [`Dispatcher`] owns one [`TopicReceiver`] per routed topic and a list of
//! [`EventHandler`]s for each.  [`Dispatcher::drain`] is the only point in
//! the consuming loop that may block: it waits at most `max_wait` for the
//! first event, then handles everything already queued without waiting
//! again, so the caller can interleave its own frame-consistent work
//! between drains.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::select_all;
use skyfuse_types::Event;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic, TopicReceiver};

/// Upper bound on events handled by one drain, so a flooding producer cannot
/// starve the caller.
const MAX_DRAIN_BATCH: usize = 4_096;

/// Receiver of routed events.
///
/// Handlers run on the dispatcher's context and must not block; copy what
/// is needed and return.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

struct Lane {
    receiver: TopicReceiver,
    handlers: Vec<Arc<dyn EventHandler>>,
}

pub struct Dispatcher {
    bus: EventBus,
    lanes: Vec<Lane>,
    closed: bool,
}

impl Dispatcher {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            lanes: Vec::new(),
            closed: false,
        }
    }

    /// Deliver every event on `topic` to `handler`.  The first route on a
    /// topic subscribes to it.
    pub fn route(&mut self, topic: Topic, handler: Arc<dyn EventHandler>) -> &mut Self {
        match self.lanes.iter_mut().find(|l| l.receiver.topic() == topic) {
            Some(lane) => lane.handlers.push(handler),
            None => self.lanes.push(Lane {
                receiver: self.bus.subscribe_to(topic),
                handlers: vec![handler],
            }),
        }
        self
    }

    /// Topics currently subscribed.
    pub fn topics(&self) -> Vec<Topic> {
        self.lanes.iter().map(|l| l.receiver.topic()).collect()
    }

    /// True once every lane's senders are gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait up to `max_wait` for an event, then handle everything pending.
    ///
    /// Returns the number of events handled; `0` means the wait timed out
    /// (or there is nothing to listen to).
    pub async fn drain(&mut self, max_wait: Duration) -> usize {
        if self.lanes.is_empty() || self.closed {
            return 0;
        }

        let first = {
            let waits = self
                .lanes
                .iter_mut()
                .map(|lane| Box::pin(lane.receiver.recv()));
            match tokio::time::timeout(max_wait, select_all(waits)).await {
                Ok((result, index, _pending)) => Some((index, result)),
                Err(_) => None,
            }
        };

        let mut handled = 0;
        match first {
            Some((index, Ok(event))) => {
                self.deliver(index, &event);
                handled += 1;
            }
            Some((index, Err(RecvError::Lagged(n)))) => {
                warn!(topic = ?self.lanes[index].receiver.topic(), lagged_by = n, "dispatcher lagged");
            }
            Some((_, Err(RecvError::Closed))) => {
                self.closed = true;
                return 0;
            }
            None => return 0,
        }

        handled + self.drain_pending(MAX_DRAIN_BATCH - handled)
    }

    /// Handle queued events without waiting, round-robin across lanes.
    fn drain_pending(&mut self, budget: usize) -> usize {
        let mut handled = 0;
        let mut closed_lanes;
        loop {
            let mut progressed = false;
            closed_lanes = 0;
            for index in 0..self.lanes.len() {
                if handled >= budget {
                    debug!(handled, "drain budget exhausted");
                    return handled;
                }
                match self.lanes[index].receiver.try_recv() {
                    Ok(event) => {
                        self.deliver(index, &event);
                        handled += 1;
                        progressed = true;
                    }
                    Err(TryRecvError::Lagged(n)) => {
                        warn!(topic = ?self.lanes[index].receiver.topic(), lagged_by = n, "dispatcher lagged");
                        progressed = true;
                    }
                    Err(TryRecvError::Closed) => closed_lanes += 1,
                    Err(TryRecvError::Empty) => {}
                }
            }
            if !progressed {
                break;
            }
        }
        if closed_lanes == self.lanes.len() {
            self.closed = true;
        }
        handled
    }

    fn deliver(&self, index: usize, event: &Event) {
        for handler in &self.lanes[index].handlers {
            handler.handle(event);
        }
    }

    /// Drop every subscription.  Later drains return immediately.
    pub fn unsubscribe_all(&mut self) {
        let topics = self.topics();
        self.lanes.clear();
        debug!(?topics, "dispatcher unsubscribed");
    }
}
