use opencv::core::Mat;

use crate::detection::ObjectDetection;

/// A decoded frame together with what the detector saw in it.
///
/// Owned by the pipeline for exactly one iteration.
pub struct DetectionFrame {
    pub image: Mat,
    pub index: u64,
    pub dims: (u32, u32),
    pub detections: Vec<ObjectDetection>,
    pub timestamp: f32, // in seconds, capture position
}
