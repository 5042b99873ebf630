use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use opencv::{core::Mat, prelude::*};

use crate::detection::ObjectDetection;
use crate::error::Error;
use crate::frame::DetectionFrame;
use crate::source::FrameSource;

/// Object detector and tracker, consumed as a black box.
///
/// Returns `Ok(None)` once it has nothing more to report.
pub trait Detector {
    fn detect(&mut self, frame: &Mat, index: u64) -> Result<Option<Vec<ObjectDetection>>, Error>;
}

/// Replays detections produced ahead of time by an external tracker.
///
/// One line per frame: `<offset>: <json array of detections>`. A line
/// without a separator stands for a frame without detections.
pub struct ReplayDetector<R: BufRead> {
    lines: Lines<R>,
}

impl ReplayDetector<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref()).map_err(|err| {
            Error::Detection(format!(
                "unable to open detection feed {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;

        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayDetector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Detector for ReplayDetector<R> {
    fn detect(&mut self, _frame: &Mat, index: u64) -> Result<Option<Vec<ObjectDetection>>, Error> {
        let line = match self.lines.next() {
            Some(line) => line?,
            None => return Ok(None),
        };

        let dets = match line.find(':') {
            Some(idx) => {
                let (_, vector) = line.split_at(idx + 1);
                serde_json::from_str(vector).map_err(|err| {
                    Error::Detection(format!("malformed detections for frame {}: {}", index, err))
                })?
            }
            None => Vec::new(),
        };

        Ok(Some(dets))
    }
}

/// Frame source and detector driven in lock step.
pub struct DetectionFeed {
    frames: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    index: u64,
}

impl DetectionFeed {
    pub fn new(frames: Box<dyn FrameSource>, detector: Box<dyn Detector>) -> Self {
        Self {
            frames,
            detector,
            index: 0,
        }
    }

    #[inline]
    pub fn fps(&self) -> Option<f64> {
        self.frames.fps()
    }

    pub fn next_frame(&mut self) -> Result<Option<DetectionFrame>, Error> {
        let (image, timestamp) = match self.frames.read()? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let detections = match self.detector.detect(&image, self.index)? {
            Some(dets) => dets,
            None => return Ok(None),
        };

        let dims = (image.cols().max(0) as u32, image.rows().max(0) as u32);
        let index = self.index;
        self.index += 1;

        Ok(Some(DetectionFrame {
            image,
            index,
            dims,
            detections,
            timestamp,
        }))
    }

    pub fn release(&mut self) -> Result<(), Error> {
        self.frames.release()
    }
}
