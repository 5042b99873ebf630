#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use opencv::core::{self, Mat, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use crosswalk_watch::bbox::{BBox, Ltrb};
use crosswalk_watch::detector::{DetectionFeed, Detector};
use crosswalk_watch::sink::OutputSink;
use crosswalk_watch::source::{FrameSource, VideoSource};
use crosswalk_watch::storage::ViolationStore;
use crosswalk_watch::{CancelFlag, Error, ObjectDetection, Session, SessionOptions};

#[derive(Clone, Default)]
pub struct Calls {
    pub source_released: Arc<AtomicUsize>,
    pub sink_written: Arc<AtomicUsize>,
    pub sink_released: Arc<AtomicUsize>,
}

/// A 640x480 road with three zebra stripes around y 280..385.
pub fn zebra() -> Mat {
    let mut img =
        Mat::new_rows_cols_with_default(480, 640, core::CV_8UC3, Scalar::all(60.0)).unwrap();

    for y in [280, 320, 360] {
        imgproc::rectangle(
            &mut img,
            Rect::new(260, y, 120, 25),
            Scalar::all(255.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
    }

    img
}

pub struct SyntheticSource {
    pub remaining: usize,
    pub fps: Option<f64>,
    pub calls: Calls,
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Option<(Mat, f32)>, Error> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        Ok(Some((zebra(), 0.0)))
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn release(&mut self) -> Result<(), Error> {
        self.calls.source_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays back one detection list per frame, then nothing.
pub struct ScriptedDetector {
    pub script: VecDeque<Vec<ObjectDetection>>,
    pub fail_at: Option<u64>,
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &Mat, index: u64) -> Result<Option<Vec<ObjectDetection>>, Error> {
        if self.fail_at == Some(index) {
            return Err(Error::Detection(format!("model crashed on frame {}", index)));
        }

        Ok(Some(self.script.pop_front().unwrap_or_default()))
    }
}

pub struct RecordingSink {
    pub calls: Calls,
}

impl OutputSink for RecordingSink {
    fn write(&mut self, _frame: &Mat) -> Result<(), Error> {
        self.calls.sink_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> Result<(), Error> {
        self.calls.sink_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn green() -> ObjectDetection {
    ObjectDetection::new(None, "green_light", BBox::<Ltrb>::ltrb(300.0, 10.0, 320.0, 60.0))
}

pub fn red() -> ObjectDetection {
    ObjectDetection::new(None, "red_light", BBox::<Ltrb>::ltrb(300.0, 10.0, 320.0, 60.0))
}

pub fn car_on_crossing(id: i32) -> ObjectDetection {
    ObjectDetection::new(Some(id), "car", BBox::<Ltrb>::ltrb(100.0, 300.0, 180.0, 350.0))
}

pub fn car_before_crossing(id: i32) -> ObjectDetection {
    ObjectDetection::new(Some(id), "car", BBox::<Ltrb>::ltrb(100.0, 400.0, 180.0, 470.0))
}

/// Session over `frames` synthetic zebra frames at 30 fps, writing to a
/// recording sink.
pub fn synthetic_session(
    frames: usize,
    script: Vec<Vec<ObjectDetection>>,
    fail_at: Option<u64>,
    store: Box<dyn ViolationStore>,
    calls: &Calls,
    cancel: CancelFlag,
) -> Session {
    let source = SyntheticSource {
        remaining: frames,
        fps: Some(30.0),
        calls: calls.clone(),
    };
    let detector = ScriptedDetector {
        script: script.into(),
        fail_at,
    };

    Session::new(
        VideoSource::File("videos/junction.mp4".into()),
        DetectionFeed::new(Box::new(source), Box::new(detector)),
        store,
        SessionOptions::default(),
        cancel,
    )
    .with_sink(
        Box::new(RecordingSink {
            calls: calls.clone(),
        }),
        "output/processed_junction.mp4.avi",
    )
}
