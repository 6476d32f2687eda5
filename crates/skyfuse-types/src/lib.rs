//! `skyfuse-types` – wire messages, the event envelope and the shared error
//! types used by every skyfuse crate.
//!
//! Field layouts follow the channels the aircraft publishes: attitude, GPS,
//! barometric altitude / airspeed, stereo point observations and raw
//! occupancy-octree blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Sensor samples
// ────────────────────────────────────────────────────────────────────────────

/// One attitude reading from the IMU / state estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttitudeSample {
    /// Sample time (microseconds since the Unix epoch).
    pub timestamp: i64,
    /// Roll angle (radians).
    pub roll: f32,
    /// Pitch angle (radians).
    pub pitch: f32,
    /// Yaw angle (radians).
    pub yaw: f32,
}

/// Latest GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub timestamp: i64,
    /// Ground speed (m/s).
    pub speed: f32,
    /// Course over ground (radians).
    pub heading: f32,
    /// Latitude (deg), longitude (deg), altitude (m).
    pub position: [f64; 3],
}

/// Barometric altitude and indicated airspeed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaroAirspeedSample {
    pub timestamp: i64,
    /// Indicated airspeed (m/s).
    pub airspeed: f32,
    /// Barometric altitude (m).
    pub altitude: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Stereo and occupancy messages
// ────────────────────────────────────────────────────────────────────────────

/// Which stereo pipeline produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoChannel {
    /// The primary detector; its frames trigger a fusion pass.
    Primary,
    /// Block-matching output, used for reviewing detections.
    BlockMatching,
}

/// A stereo detection result as it arrives on the wire.
///
/// `x`, `y` and `z` are parallel arrays of `number_of_points` sensor-frame
/// coordinates.  `frame_x` / `frame_y` carry the matching pixel coordinates
/// when the producer supplies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoObservation {
    pub timestamp: i64,
    pub video_number: i32,
    pub frame_number: i32,
    pub number_of_points: i32,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_x: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_y: Option<Vec<i32>>,
}

/// A serialised occupancy octree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyUpdate {
    pub timestamp: i64,
    /// Declared payload length in bytes; must match `data.len()`.
    pub length: u32,
    pub data: Vec<u8>,
}

impl OccupancyUpdate {
    /// Wrap `data`, filling in `length` from the buffer size.
    pub fn new(timestamp: i64, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            length: declared_length(data.len()),
            data,
        }
    }
}

/// Saturates at `u32::MAX`; such a payload then fails the length check on
/// ingest instead of passing with a wrapped length.
fn declared_length(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Ask the recorder / reader for a specific historical frame.  Inbound
/// messages with the same layout announce which frame is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub video_number: i32,
    pub frame_number: i32,
}

/// A reviewer-drawn pixel rectangle marking valid detections on the frame
/// currently being replayed.  A corner at `(-1, -1)` means no box is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewBox {
    pub top: [i32; 2],
    pub bottom: [i32; 2],
}

// ────────────────────────────────────────────────────────────────────────────
// Event envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"skyfuse-middleware::udp/attitude"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Every kind of message that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Attitude(AttitudeSample),
    Gps(GpsSample),
    BaroAirspeed(BaroAirspeedSample),
    Stereo {
        channel: StereoChannel,
        observation: StereoObservation,
    },
    Occupancy(OccupancyUpdate),
    Replay(ReplayRequest),
    Review(ReviewBox),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failures while decoding a serialised occupancy octree.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("declared length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("unrecognised octree header: {0}")]
    BadHeader(String),

    #[error("octree header is missing `{0}`")]
    MissingField(String),

    #[error("invalid octree resolution {0}")]
    InvalidResolution(f64),

    #[error("octree data truncated at byte {0}")]
    Truncated(usize),

    #[error("{0} trailing bytes after octree data")]
    TrailingBytes(usize),

    #[error("header declares {declared} nodes but {decoded} were decoded")]
    SizeMismatch { declared: usize, decoded: usize },

    #[error("octree nodes nested deeper than {0} levels")]
    TooDeep(u8),
}

/// Global error type for the fusion stack.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum FusionError {
    #[error("Occupancy Decode Error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Malformed stereo message (frame {frame_number}): {details}")]
    MalformedStereo { frame_number: i32, details: String },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_observation_without_pixels_omits_fields() {
        let obs = StereoObservation {
            timestamp: 10,
            video_number: 2,
            frame_number: 7,
            number_of_points: 1,
            x: vec![1.0],
            y: vec![2.0],
            z: vec![3.0],
            frame_x: None,
            frame_y: None,
        };
        let json = serde_json::to_string(&obs).unwrap();
        assert!(!json.contains("frame_x"));

        let back: StereoObservation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, obs);
    }

    #[test]
    fn stereo_observation_accepts_missing_pixel_arrays() {
        let json = r#"{"timestamp":0,"video_number":0,"frame_number":0,
                       "number_of_points":0,"x":[],"y":[],"z":[]}"#;
        let obs: StereoObservation = serde_json::from_str(json).unwrap();
        assert!(obs.frame_x.is_none());
        assert!(obs.frame_y.is_none());
    }

    #[test]
    fn occupancy_update_new_fills_length() {
        let update = OccupancyUpdate::new(5, vec![1, 2, 3]);
        assert_eq!(update.length, 3);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_length_saturates() {
        assert_eq!(declared_length(u32::MAX as usize), u32::MAX);
        assert_eq!(declared_length(u32::MAX as usize + 1), u32::MAX);
        assert_eq!(declared_length(1 << 40), u32::MAX);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "skyfuse-middleware::udp/attitude",
            EventPayload::Attitude(AttitudeSample {
                timestamp: 1,
                roll: 0.1,
                pitch: 0.2,
                yaw: 0.3,
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(back.payload, EventPayload::Attitude(a) if a.yaw == 0.3));
    }

    #[test]
    fn fusion_error_display() {
        let err = FusionError::from(DecodeError::Truncated(12));
        assert!(err.to_string().contains("Occupancy Decode Error"));
        assert!(err.to_string().contains("12"));

        let err2 = FusionError::MalformedStereo {
            frame_number: 42,
            details: "x has 2 entries".to_string(),
        };
        assert!(err2.to_string().contains("42"));
    }
}
