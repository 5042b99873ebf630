use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Ltwh};

pub const DEFAULT_VEHICLE_LABELS: [&str; 5] = ["bus", "car", "motorcycle", "truck", "van"];

/// One object reported by the external detector/tracker for a single frame.
///
/// `bbox` is in left-top-right-bottom pixel coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    #[serde(rename = "id", default)]
    pub track_id: Option<i32>,
    pub label: String,
    pub bbox: [f32; 4],
}

impl ObjectDetection {
    pub fn new(track_id: Option<i32>, label: &str, bbox: BBox<Ltrb>) -> Self {
        Self {
            track_id,
            label: label.to_string(),
            bbox: bbox.into(),
        }
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Ltrb> {
        BBox::assigned(&self.bbox)
    }

    #[inline]
    pub fn ltwh(&self) -> BBox<Ltwh> {
        self.bbox().as_ltwh()
    }

    /// Stable track identity, if the tracker assigned one.
    ///
    /// Trackers report `-1` for objects they could not associate; that value
    /// is shared by unrelated objects and is not an identity.
    #[inline]
    pub fn identity(&self) -> Option<i32> {
        self.track_id.filter(|id| *id >= 0)
    }

    pub fn class(&self, vehicle_labels: &[String]) -> ObjectClass {
        if let Some(color) = LightColor::from_label(&self.label) {
            ObjectClass::Light(color)
        } else if vehicle_labels.iter().any(|l| l == &self.label) {
            ObjectClass::Vehicle
        } else {
            ObjectClass::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Vehicle,
    Light(LightColor),
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    Green,
    Red,
    Yellow,
}

impl LightColor {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "green_light" => Some(LightColor::Green),
            "red_light" => Some(LightColor::Red),
            "yellow_light" => Some(LightColor::Yellow),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LightColor::Green => "green_light",
            LightColor::Red => "red_light",
            LightColor::Yellow => "yellow_light",
        }
    }
}
