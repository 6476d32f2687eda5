//! Sensor state cache.
//!
//! [`SensorStateStore`] keeps exactly one current sample per navigation
//! channel (attitude, GPS, barometric altitude / airspeed).  Each channel is
//! its own [`LatestSlot`] with its own lock, so an attitude update never
//! waits on a GPS reader and vice versa.
//!
//! # Example
//!
//! ```rust
//! use skyfuse_perception::state_store::SensorStateStore;
//! use skyfuse_types::AttitudeSample;
//!
//! let store = SensorStateStore::new();
//! assert!(store.latest_attitude().is_none());
//!
//! store.update_attitude(AttitudeSample { timestamp: 1, roll: 0.0, pitch: 0.1, yaw: 0.0 });
//! assert_eq!(store.latest_attitude().unwrap().pitch, 0.1);
//! ```

use skyfuse_types::{AttitudeSample, BaroAirspeedSample, GpsSample};
use tracing::trace;

use crate::slot::LatestSlot;

/// Copies of every channel's latest sample taken during one fusion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub attitude: Option<AttitudeSample>,
    pub gps: Option<GpsSample>,
    pub baro_airspeed: Option<BaroAirspeedSample>,
}

/// Latest-value cache for the navigation channels.
#[derive(Default)]
pub struct SensorStateStore {
    attitude: LatestSlot<AttitudeSample>,
    gps: LatestSlot<GpsSample>,
    baro_airspeed: LatestSlot<BaroAirspeedSample>,
}

impl SensorStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_attitude(&self, sample: AttitudeSample) {
        let generation = self.attitude.store(sample);
        trace!(generation, timestamp = sample.timestamp, "attitude updated");
    }

    pub fn update_gps(&self, sample: GpsSample) {
        let generation = self.gps.store(sample);
        trace!(generation, timestamp = sample.timestamp, "gps updated");
    }

    pub fn update_baro_airspeed(&self, sample: BaroAirspeedSample) {
        let generation = self.baro_airspeed.store(sample);
        trace!(generation, timestamp = sample.timestamp, "baro/airspeed updated");
    }

    pub fn latest_attitude(&self) -> Option<AttitudeSample> {
        self.attitude.latest()
    }

    pub fn latest_gps(&self) -> Option<GpsSample> {
        self.gps.latest()
    }

    pub fn latest_baro_airspeed(&self) -> Option<BaroAirspeedSample> {
        self.baro_airspeed.latest()
    }

    /// Copy out every channel.
    ///
    /// Channels are read in the fixed order attitude → GPS → baro, and each
    /// lock is released before the next is taken; no two locks are ever held
    /// at once.  Individual samples are never torn, though the three may come
    /// from slightly different instants.
    pub fn snapshot(&self) -> SensorSnapshot {
        let attitude = self.latest_attitude();
        let gps = self.latest_gps();
        let baro_airspeed = self.latest_baro_airspeed();
        SensorSnapshot {
            attitude,
            gps,
            baro_airspeed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn attitude(v: f32) -> AttitudeSample {
        AttitudeSample {
            timestamp: (v * 1000.0) as i64,
            roll: v,
            pitch: v,
            yaw: v,
        }
    }

    #[test]
    fn no_data_before_first_update() {
        let store = SensorStateStore::new();
        assert_eq!(store.snapshot(), SensorSnapshot::default());
    }

    #[test]
    fn update_replaces_previous_sample() {
        let store = SensorStateStore::new();
        store.update_attitude(attitude(1.0));
        store.update_attitude(attitude(2.0));
        assert_eq!(store.latest_attitude(), Some(attitude(2.0)));
    }

    #[test]
    fn channels_are_independent() {
        let store = SensorStateStore::new();
        store.update_baro_airspeed(BaroAirspeedSample {
            timestamp: 3,
            airspeed: 14.0,
            altitude: 120.0,
        });
        let snap = store.snapshot();
        assert!(snap.attitude.is_none());
        assert!(snap.gps.is_none());
        assert_eq!(snap.baro_airspeed.map(|b| b.airspeed), Some(14.0));
    }

    #[test]
    fn gps_sample_is_copied_out() {
        let store = SensorStateStore::new();
        let fix = GpsSample {
            timestamp: 9,
            speed: 12.5,
            heading: 1.2,
            position: [42.36, -71.09, 30.0],
        };
        store.update_gps(fix);
        assert_eq!(store.latest_gps(), Some(fix));
    }

    #[test]
    fn concurrent_reads_never_observe_torn_samples() {
        let store = Arc::new(SensorStateStore::new());
        store.update_attitude(attitude(0.0));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..20_000 {
                    store.update_attitude(attitude((i % 2) as f32));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        let a = store.latest_attitude().expect("seeded");
                        // Every field of one sample carries the same value.
                        assert_eq!(a.roll, a.pitch);
                        assert_eq!(a.pitch, a.yaw);
                        assert_eq!(a.timestamp, (a.roll * 1000.0) as i64);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
