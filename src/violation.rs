use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::bbox::{intersection_area, BBox, Ltwh};
use crate::storage::ViolationTime;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackState {
    pub crossed: bool,
    pub crossed_on_red: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub total_crossings: u32,
    pub red_light_violations: u32,
}

/// A track that entered the crossing for the first time on red.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub track_id: i32,
    pub at: ViolationTime,
}

/// Per-session crossing bookkeeping.
///
/// A track is judged once, on the first frame its box overlaps the
/// crossing; later frames never change the verdict.
#[derive(Debug, Default)]
pub struct CrossingMonitor {
    tracks: BTreeMap<i32, TrackState>,
    counters: SessionCounters,
}

impl CrossingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        track_id: Option<i32>,
        vehicle: &BBox<Ltwh>,
        crossing: &BBox<Ltwh>,
        is_red: bool,
        at: ViolationTime,
    ) -> Option<Violation> {
        if vehicle.area() <= 0.0 || intersection_area(vehicle, crossing) <= 0.0 {
            return None;
        }

        // overlapping, but without identity there is nothing to remember it by
        let track_id = track_id?;

        let state = self.tracks.entry(track_id).or_default();
        if state.crossed {
            return None;
        }

        state.crossed = true;
        self.counters.total_crossings += 1;

        if !is_red {
            return None;
        }

        state.crossed_on_red = true;
        self.counters.red_light_violations += 1;

        Some(Violation { track_id, at })
    }

    #[inline]
    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    #[inline]
    pub fn tracks(&self) -> &BTreeMap<i32, TrackState> {
        &self.tracks
    }

    #[inline]
    pub fn state(&self, track_id: i32) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }
}
