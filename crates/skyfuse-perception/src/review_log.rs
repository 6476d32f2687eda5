//! Reviewer selection log entries.
//!
//! One line per reviewed frame: `video,frame,i0,i1,...` where the trailing
//! integers are the indices of the stereo points the reviewer marked valid.

use std::fmt;
use std::str::FromStr;

use skyfuse_types::FusionError;

use crate::stereo::{Pixel, StereoFrame, filter_by_pixel_box};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewLogEntry {
    pub video_number: i32,
    pub frame_number: i32,
    pub valid_indices: Vec<usize>,
}

impl ReviewLogEntry {
    /// Build the entry for a reviewer box drawn over `frame`.
    pub fn from_box(frame: &StereoFrame, top: Pixel, bottom: Pixel) -> Self {
        Self {
            video_number: frame.video_number,
            frame_number: frame.frame_number,
            valid_indices: filter_by_pixel_box(frame, top, bottom),
        }
    }
}

impl fmt::Display for ReviewLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.video_number, self.frame_number)?;
        for i in &self.valid_indices {
            write!(f, ",{i}")?;
        }
        Ok(())
    }
}

impl FromStr for ReviewLogEntry {
    type Err = FusionError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim().split(',').map(str::trim);

        let mut next_i32 = |name: &str| -> Result<i32, FusionError> {
            let raw = fields
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| FusionError::Parsing(format!("review line missing {name}")))?;
            raw.parse()
                .map_err(|e| FusionError::Parsing(format!("bad {name} '{raw}': {e}")))
        };
        let video_number = next_i32("video number")?;
        let frame_number = next_i32("frame number")?;

        let valid_indices = fields
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<usize>()
                    .map_err(|e| FusionError::Parsing(format!("bad index '{s}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            video_number,
            frame_number,
            valid_indices,
        })
    }
}
