//! Frame review workflow.
//!
//! A reviewer draws a box over the block-matching image; the points whose
//! pixels fall inside it are the valid ones.  [`ReviewRecorder::record`]
//! appends that selection to the review log and asks the external recorder
//! for the next frame by publishing a [`ReplayRequest`].

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use skyfuse_middleware::EventBus;
use skyfuse_perception::review_log::ReviewLogEntry;
use skyfuse_perception::stereo::{Pixel, StereoFrame};
use skyfuse_types::{Event, EventPayload, FusionError, ReplayRequest, ReviewBox};
use tracing::{debug, info, warn};

const SOURCE: &str = "skyfuse-runtime::review";

pub struct ReviewRecorder {
    bus: EventBus,
    log_path: Option<PathBuf>,
}

impl ReviewRecorder {
    /// Without a `log_path` entries are only logged, never written.
    pub fn new(bus: EventBus, log_path: Option<PathBuf>) -> Self {
        Self { bus, log_path }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Record the points of `frame` inside `review` and request the frame
    /// after it.
    ///
    /// At the last representable frame number the entry is still written
    /// but no request is published.
    ///
    /// The entry is labelled with `position` (the replay position last
    /// announced) when known, otherwise with the frame's own numbers.
    pub fn record(
        &self,
        frame: &StereoFrame,
        position: Option<ReplayRequest>,
        review: &ReviewBox,
    ) -> Result<ReviewLogEntry, FusionError> {
        let mut entry =
            ReviewLogEntry::from_box(frame, Pixel::from(review.top), Pixel::from(review.bottom));
        if let Some(position) = position {
            entry.video_number = position.video_number;
            entry.frame_number = position.frame_number;
        }

        if let Some(path) = &self.log_path {
            append_entry(path, &entry)?;
        }
        info!(
            video = entry.video_number,
            frame = entry.frame_number,
            valid = entry.valid_indices.len(),
            "frame reviewed"
        );

        match entry.frame_number.checked_add(1) {
            Some(next) => {
                self.request_frame(entry.video_number, next);
            }
            None => warn!(
                video = entry.video_number,
                frame = entry.frame_number,
                "no frame after the last frame number; replay request skipped"
            ),
        }
        Ok(entry)
    }

    /// Publish a replay request.  Returns `false` when nobody is listening.
    pub fn request_frame(&self, video_number: i32, frame_number: i32) -> bool {
        let event = Event::new(
            SOURCE,
            EventPayload::Replay(ReplayRequest {
                video_number,
                frame_number,
            }),
        );
        match self.bus.publish(event) {
            Ok(_) => true,
            Err(e) => {
                debug!(video_number, frame_number, error = %e, "replay request not delivered");
                false
            }
        }
    }
}

fn append_entry(path: &Path, entry: &ReviewLogEntry) -> Result<(), FusionError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FusionError::Io(format!("cannot open review log {}: {e}", path.display())))?;
    writeln!(file, "{entry}")
        .map_err(|e| FusionError::Io(format!("cannot write review log {}: {e}", path.display())))
}

/// Read every entry of a review log.  Blank lines are skipped.
pub fn read_review_log(path: &Path) -> Result<Vec<ReviewLogEntry>, FusionError> {
    let file = std::fs::File::open(path)
        .map_err(|e| FusionError::Io(format!("cannot open review log {}: {e}", path.display())))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| FusionError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(line.parse()?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfuse_middleware::Topic;
    use skyfuse_perception::Point3;

    fn bm_frame() -> StereoFrame {
        StereoFrame {
            timestamp: 0,
            video_number: 3,
            frame_number: 7,
            points: vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(3.0, 0.0, 0.0),
            ],
            pixels: Some(vec![
                Pixel::new(5, 5),
                Pixel::new(15, 15),
                Pixel::new(25, 25),
            ]),
        }
    }

    fn review_box() -> ReviewBox {
        ReviewBox {
            top: [10, 10],
            bottom: [20, 20],
        }
    }

    #[test]
    fn record_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.txt");
        let recorder = ReviewRecorder::new(EventBus::default(), Some(path.clone()));

        recorder.record(&bm_frame(), None, &review_box()).unwrap();
        recorder
            .record(
                &bm_frame(),
                Some(ReplayRequest {
                    video_number: 3,
                    frame_number: 8,
                }),
                &ReviewBox {
                    top: [0, 0],
                    bottom: [30, 30],
                },
            )
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "3,7,1\n3,8,0,1,2\n");
        let entries = read_review_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].valid_indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn record_requests_next_frame() {
        let bus = EventBus::default();
        let mut replay = bus.subscribe_to(Topic::Replay);
        let recorder = ReviewRecorder::new(bus.clone(), None);

        let entry = recorder
            .record(
                &bm_frame(),
                Some(ReplayRequest {
                    video_number: 9,
                    frame_number: 41,
                }),
                &review_box(),
            )
            .unwrap();
        assert_eq!((entry.video_number, entry.frame_number), (9, 41));

        let event = replay.recv().await.unwrap();
        assert_eq!(event.source, SOURCE);
        match event.payload {
            EventPayload::Replay(r) => assert_eq!(
                r,
                ReplayRequest {
                    video_number: 9,
                    frame_number: 42
                }
            ),
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_frame_number_records_without_request() {
        let bus = EventBus::default();
        let mut replay = bus.subscribe_to(Topic::Replay);
        let recorder = ReviewRecorder::new(bus.clone(), None);

        let entry = recorder
            .record(
                &bm_frame(),
                Some(ReplayRequest {
                    video_number: 9,
                    frame_number: i32::MAX,
                }),
                &review_box(),
            )
            .unwrap();
        assert_eq!(entry.frame_number, i32::MAX);
        assert!(replay.try_recv().is_err());
    }

    #[test]
    fn request_without_listener_reports_false() {
        let recorder = ReviewRecorder::new(EventBus::default(), None);
        assert!(!recorder.request_frame(1, 1));
        assert!(recorder.log_path().is_none());
    }

    #[test]
    fn unwritable_log_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let recorder = ReviewRecorder::new(EventBus::default(), Some(dir.path().to_path_buf()));
        assert!(matches!(
            recorder.record(&bm_frame(), None, &review_box()),
            Err(FusionError::Io(_))
        ));
    }

    #[test]
    fn reading_a_corrupt_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.txt");
        std::fs::write(&path, "1,2,3\n\nnot,a,line\n").unwrap();
        assert!(matches!(read_review_log(&path), Err(FusionError::Parsing(_))));
    }
}
