//! Stereo point ingestion.
//!
//! [`parse_stereo_message`] turns a wire-level [`StereoObservation`] into an
//! immutable [`StereoFrame`] of sensor-frame points, with the parallel pixel
//! coordinates when the producer sent them.  [`filter_by_pixel_box`] selects
//! the detections whose pixel falls inside a reviewer-drawn rectangle.

use nalgebra::Point3;
use skyfuse_types::{FusionError, StereoObservation};

/// Pixel coordinate (column, row) on the left camera image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
}

impl Pixel {
    /// Corner value meaning "no box drawn".
    pub const SENTINEL: Pixel = Pixel { x: -1, y: -1 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
}

impl From<[i32; 2]> for Pixel {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

/// One decoded stereo detection result.
///
/// Points are in the sensor/body frame; nothing in this type ever moves them
/// into another frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoFrame {
    pub timestamp: i64,
    pub video_number: i32,
    pub frame_number: i32,
    pub points: Vec<Point3<f32>>,
    /// `pixels[i]` is where `points[i]` was seen, when available.
    pub pixels: Option<Vec<Pixel>>,
}

impl StereoFrame {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decode a stereo observation.
///
/// Zero points is a valid, empty frame.
///
/// # Errors
///
/// Returns [`FusionError::MalformedStereo`] when `number_of_points` is
/// negative, when a coordinate array does not hold exactly that many entries,
/// or when only one of the two pixel arrays is present.
pub fn parse_stereo_message(msg: &StereoObservation) -> Result<StereoFrame, FusionError> {
    let malformed = |details: String| FusionError::MalformedStereo {
        frame_number: msg.frame_number,
        details,
    };

    let n = usize::try_from(msg.number_of_points)
        .map_err(|_| malformed(format!("negative point count {}", msg.number_of_points)))?;

    for (axis, values) in [("x", &msg.x), ("y", &msg.y), ("z", &msg.z)] {
        if values.len() != n {
            return Err(malformed(format!(
                "{axis} has {} entries, expected {n}",
                values.len()
            )));
        }
    }

    let points = msg
        .x
        .iter()
        .zip(&msg.y)
        .zip(&msg.z)
        .map(|((&x, &y), &z)| Point3::new(x, y, z))
        .collect();

    let pixels = match (&msg.frame_x, &msg.frame_y) {
        (None, None) => None,
        (Some(fx), Some(fy)) => {
            if fx.len() != n || fy.len() != n {
                return Err(malformed(format!(
                    "pixel arrays have {}/{} entries, expected {n}",
                    fx.len(),
                    fy.len()
                )));
            }
            Some(fx.iter().zip(fy).map(|(&x, &y)| Pixel::new(x, y)).collect())
        }
        _ => return Err(malformed("only one of frame_x / frame_y present".to_string())),
    };

    Ok(StereoFrame {
        timestamp: msg.timestamp,
        video_number: msg.video_number,
        frame_number: msg.frame_number,
        points,
        pixels,
    })
}

/// Indices of the points whose pixel lies inside the rectangle spanned by
/// `top` and `bottom` (inclusive; the corners may be given in any order).
///
/// Returns an empty set when either corner is [`Pixel::SENTINEL`] or the
/// frame carries no pixel coordinates.
pub fn filter_by_pixel_box(frame: &StereoFrame, top: Pixel, bottom: Pixel) -> Vec<usize> {
    if top.is_sentinel() || bottom.is_sentinel() {
        return Vec::new();
    }
    let Some(pixels) = &frame.pixels else {
        return Vec::new();
    };

    let (min_x, max_x) = (top.x.min(bottom.x), top.x.max(bottom.x));
    let (min_y, max_y) = (top.y.min(bottom.y), top.y.max(bottom.y));

    pixels
        .iter()
        .enumerate()
        .filter(|(_, p)| p.x >= min_x && p.x <= max_x && p.y >= min_y && p.y <= max_y)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(pixels: Option<(Vec<i32>, Vec<i32>)>) -> StereoObservation {
        let (frame_x, frame_y) = match pixels {
            Some((x, y)) => (Some(x), Some(y)),
            None => (None, None),
        };
        StereoObservation {
            timestamp: 100,
            video_number: 3,
            frame_number: 17,
            number_of_points: 3,
            x: vec![1.0, 2.0, 3.0],
            y: vec![0.1, 0.2, 0.3],
            z: vec![10.0, 20.0, 30.0],
            frame_x,
            frame_y,
        }
    }

    #[test]
    fn parses_points_in_order() {
        let frame = parse_stereo_message(&observation(None)).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.points[1], Point3::new(2.0, 0.2, 20.0));
        assert_eq!(frame.video_number, 3);
        assert_eq!(frame.frame_number, 17);
        assert!(frame.pixels.is_none());
    }

    #[test]
    fn empty_message_is_valid() {
        let msg = StereoObservation {
            number_of_points: 0,
            x: vec![],
            y: vec![],
            z: vec![],
            ..observation(None)
        };
        let frame = parse_stereo_message(&msg).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let msg = StereoObservation {
            number_of_points: 4,
            ..observation(None)
        };
        let err = parse_stereo_message(&msg).unwrap_err();
        assert!(matches!(err, FusionError::MalformedStereo { frame_number: 17, .. }));
    }

    #[test]
    fn negative_count_is_rejected() {
        let msg = StereoObservation {
            number_of_points: -1,
            ..observation(None)
        };
        assert!(parse_stereo_message(&msg).is_err());
    }

    #[test]
    fn half_pixel_arrays_are_rejected() {
        let msg = StereoObservation {
            frame_x: Some(vec![1, 2, 3]),
            ..observation(None)
        };
        assert!(parse_stereo_message(&msg).is_err());
    }

    #[test]
    fn box_selects_only_inside_points() {
        let msg = observation(Some((vec![5, 15, 25], vec![5, 15, 25])));
        let frame = parse_stereo_message(&msg).unwrap();
        let idx = filter_by_pixel_box(&frame, Pixel::new(10, 10), Pixel::new(20, 20));
        assert_eq!(idx, vec![1]);
    }

    #[test]
    fn box_edges_are_inclusive_and_corners_unordered() {
        let msg = observation(Some((vec![10, 20, 21], vec![20, 10, 15])));
        let frame = parse_stereo_message(&msg).unwrap();
        let idx = filter_by_pixel_box(&frame, Pixel::new(20, 20), Pixel::new(10, 10));
        assert_eq!(idx, vec![0, 1]);
    }

    #[test]
    fn sentinel_corner_means_no_box() {
        let msg = observation(Some((vec![5, 15, 25], vec![5, 15, 25])));
        let frame = parse_stereo_message(&msg).unwrap();
        assert!(filter_by_pixel_box(&frame, Pixel::new(10, 10), Pixel::SENTINEL).is_empty());
        assert!(filter_by_pixel_box(&frame, Pixel::SENTINEL, Pixel::new(20, 20)).is_empty());
    }

    #[test]
    fn frame_without_pixels_selects_nothing() {
        let frame = parse_stereo_message(&observation(None)).unwrap();
        assert!(filter_by_pixel_box(&frame, Pixel::new(0, 0), Pixel::new(100, 100)).is_empty());
    }
}
