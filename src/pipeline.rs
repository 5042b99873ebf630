use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use opencv::core::Mat;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltwh};
use crate::crossing::{CrossingLocator, CrossingLocatorConfig};
use crate::detection::{LightColor, ObjectClass, ObjectDetection, DEFAULT_VEHICLE_LABELS};
use crate::detector::DetectionFeed;
use crate::error::Error;
use crate::frame::DetectionFrame;
use crate::overlay;
use crate::sink::OutputSink;
use crate::source::VideoSource;
use crate::storage::{ViolationRecord, ViolationStore, ViolationTime};
use crate::violation::{CrossingMonitor, TrackState, Violation};

pub const DEFAULT_FPS: f64 = 30.0;

/// Cooperative stop request shared between a session and its owner.
///
/// Observed once per frame; a frame already being processed completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub vehicle_labels: Vec<String>,
    /// Used when the container does not report a usable frame rate.
    pub default_fps: f64,
    pub locator: CrossingLocatorConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            vehicle_labels: DEFAULT_VEHICLE_LABELS.iter().map(|s| s.to_string()).collect(),
            default_fps: DEFAULT_FPS,
            locator: CrossingLocatorConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VehicleInfo {
    /// Track id, `-1` when the tracker gave none.
    pub id: i32,
    pub label: String,
    /// Left-top-right-bottom
    pub bbox: [f32; 4],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LightInfo {
    pub label: String,
    pub bbox: [f32; 4],
}

/// Everything a viewer needs to know about one processed frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub frame_index: u64,
    pub vehicles: Vec<VehicleInfo>,
    pub traffic_lights: Vec<LightInfo>,
    /// Left-top-width-height
    pub crosswalk_bbox: Option<[f32; 4]>,
    pub total_crossings: u32,
    pub red_light_violations: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub vehicle_states: BTreeMap<i32, TrackState>,
    pub output_path: Option<String>,
}

pub struct FrameOutput {
    pub result: FrameResult,
    /// The annotated frame
    pub image: Mat,
}

/// One run of the violation pipeline over one source.
///
/// Iterating drives the detector frame by frame. The iterator ends on
/// exhaustion, cancellation, or right after yielding the first error; the
/// sink and the capture are released exactly once on any of those paths,
/// or on drop.
pub struct Session {
    source: VideoSource,
    feed: DetectionFeed,
    store: Box<dyn ViolationStore>,
    sink: Option<Box<dyn OutputSink>>,
    output_path: Option<String>,
    locator: CrossingLocator,
    crossing: OnceCell<BBox<Ltwh>>,
    monitor: CrossingMonitor,
    vehicle_labels: Vec<String>,
    fps: f64,
    cancel: CancelFlag,
    frames_done: u64,
    finished: bool,
}

impl Session {
    pub fn new(
        source: VideoSource,
        feed: DetectionFeed,
        store: Box<dyn ViolationStore>,
        options: SessionOptions,
        cancel: CancelFlag,
    ) -> Self {
        let fps = resolve_fps(feed.fps(), options.default_fps);
        log::info!("{}: starting session at {:.2} fps", source, fps);

        Self {
            source,
            feed,
            store,
            sink: None,
            output_path: None,
            locator: CrossingLocator::new(options.locator),
            crossing: OnceCell::new(),
            monitor: CrossingMonitor::new(),
            vehicle_labels: options.vehicle_labels,
            fps,
            cancel,
            frames_done: 0,
            finished: false,
        }
    }

    /// Also writes every annotated frame to `sink`, reported as `path`.
    pub fn with_sink<S: Into<String>>(mut self, sink: Box<dyn OutputSink>, path: S) -> Self {
        let path = path.into();
        log::info!("{}: saving processed video to {}", self.source, path);

        self.sink = Some(sink);
        self.output_path = Some(path);
        self
    }

    #[inline]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    #[inline]
    pub fn crossing(&self) -> Option<&BBox<Ltwh>> {
        self.crossing.get()
    }

    #[inline]
    pub fn monitor(&self) -> &CrossingMonitor {
        &self.monitor
    }

    fn step(&mut self) -> Result<Option<FrameOutput>, Error> {
        let DetectionFrame {
            mut image,
            index,
            dims,
            detections,
            timestamp,
        } = match self.feed.next_frame()? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        log::trace!(
            "{}: frame {} at {:.3}s, {} detections",
            self.source,
            index,
            timestamp,
            detections.len()
        );

        let mut vehicles = Vec::new();
        let mut lights = Vec::new();
        for det in detections {
            match det.class(&self.vehicle_labels) {
                ObjectClass::Vehicle => vehicles.push(det),
                ObjectClass::Light(color) => lights.push((color, det.ltwh())),
                ObjectClass::Other => {}
            }
        }

        let is_red = lights.iter().any(|(color, _)| *color == LightColor::Red);

        if self.crossing.get().is_none() {
            if let Some(anchor) = anchor_light(&lights) {
                if let Some(region) = self.locator.locate(&image, &anchor)? {
                    log::info!(
                        "{}: crossing located at y={}..{} (frame {})",
                        self.source,
                        region.top(),
                        region.bottom(),
                        index
                    );
                    let _ = self.crossing.set(region);
                }
            }
        }

        if let Some(crossing) = self.crossing.get().copied() {
            let at = self.violation_time(index);

            for veh in &vehicles {
                let violation =
                    self.monitor
                        .evaluate(veh.identity(), &veh.ltwh(), &crossing, is_red, at);

                if let Some(violation) = violation {
                    self.persist(violation);
                }
            }
        }

        let counters = self.monitor.counters();
        overlay::annotate(&mut image, self.crossing.get(), &lights, &vehicles, counters)?;

        let result = FrameResult {
            frame_index: index,
            vehicles: vehicles.iter().map(vehicle_info).collect(),
            traffic_lights: lights
                .iter()
                .map(|(color, bbox)| LightInfo {
                    label: color.label().to_string(),
                    bbox: bbox.as_ltrb().into(),
                })
                .collect(),
            crosswalk_bbox: self.crossing.get().map(|c| (*c).into()),
            total_crossings: counters.total_crossings,
            red_light_violations: counters.red_light_violations,
            frame_width: dims.0,
            frame_height: dims.1,
            vehicle_states: self.monitor.tracks().clone(),
            output_path: self.output_path.clone(),
        };

        if let Some(sink) = self.sink.as_mut() {
            sink.write(&image)?;
        }

        self.frames_done += 1;

        Ok(Some(FrameOutput { result, image }))
    }

    fn violation_time(&self, frame_idx: u64) -> ViolationTime {
        if self.source.is_live() {
            ViolationTime::WallClock(Local::now())
        } else {
            ViolationTime::from_frame(frame_idx, self.fps)
        }
    }

    fn persist(&mut self, violation: Violation) {
        let record = ViolationRecord {
            vehicle_id: violation.track_id.to_string(),
            time: violation.at,
            processed_video_path: self.output_path.clone(),
            original_video_path: self.source.original_path(),
        };

        match self.store.insert(&record) {
            Ok(id) => log::info!(
                "{}: violation #{} vehicle {} crossed on red ({:?})",
                self.source,
                id,
                record.vehicle_id,
                record.time
            ),
            Err(err) => log::error!(
                "{}: failed to store violation of vehicle {}: {}",
                self.source,
                record.vehicle_id,
                err
            ),
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.release() {
                log::warn!("{}: failed to release output: {}", self.source, err);
            }
        }

        if let Err(err) = self.feed.release() {
            log::warn!("{}: failed to release capture: {}", self.source, err);
        }

        let counters = self.monitor.counters();
        log::info!(
            "{}: session finished after {} frames, {} crossings, {} on red",
            self.source,
            self.frames_done,
            counters.total_crossings,
            counters.red_light_violations
        );
    }
}

impl Iterator for Session {
    type Item = Result<FrameOutput, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.cancel.is_cancelled() {
            log::info!("{}: cancellation requested", self.source);
            self.finish();
            return None;
        }

        match self.step() {
            Ok(Some(output)) => Some(Ok(output)),
            Ok(None) => {
                let empty = self.frames_done == 0;
                self.finish();

                if empty {
                    Some(Err(Error::Source(format!("{} yielded no frames", self.source))))
                } else {
                    None
                }
            }
            Err(err) => {
                log::error!("{}: aborting session: {}", self.source, err);
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Session {}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish();
    }
}

fn resolve_fps(probed: Option<f64>, default_fps: f64) -> f64 {
    match probed {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => {
            log::warn!("frame rate unknown, assuming {} fps", default_fps);
            default_fps
        }
    }
}

/// Any light will do as the crossing anchor; green first, then red, then yellow.
fn anchor_light(lights: &[(LightColor, BBox<Ltwh>)]) -> Option<BBox<Ltwh>> {
    [LightColor::Green, LightColor::Red, LightColor::Yellow]
        .iter()
        .find_map(|wanted| {
            lights
                .iter()
                .find(|(color, _)| color == wanted)
                .map(|(_, bbox)| *bbox)
        })
}

fn vehicle_info(det: &ObjectDetection) -> VehicleInfo {
    VehicleInfo {
        id: det.identity().unwrap_or(-1),
        label: det.label.clone(),
        bbox: det.bbox,
    }
}
