mod common;

use std::sync::atomic::Ordering;

use opencv::prelude::*;

use crosswalk_watch::bbox::{BBox, Ltrb};
use crosswalk_watch::storage::{
    InMemoryViolationStore, StoredViolation, ViolationRecord, ViolationStore,
};
use crosswalk_watch::{CancelFlag, Error, ObjectDetection, Session};

use common::*;

struct Fixture {
    session: Session,
    store: InMemoryViolationStore,
    calls: Calls,
    cancel: CancelFlag,
}

fn fixture(frames: usize, script: Vec<Vec<ObjectDetection>>, fail_at: Option<u64>) -> Fixture {
    let calls = Calls::default();
    let store = InMemoryViolationStore::new();
    let cancel = CancelFlag::new();

    let session = synthetic_session(
        frames,
        script,
        fail_at,
        Box::new(store.clone()),
        &calls,
        cancel.clone(),
    );

    Fixture {
        session,
        store,
        calls,
        cancel,
    }
}

#[test]
fn crossing_on_green_is_counted_but_not_recorded() {
    let Fixture {
        session,
        store,
        calls,
        ..
    } = fixture(
        4,
        vec![
            vec![green(), car_before_crossing(1)],
            vec![green(), car_on_crossing(1)],
            vec![red(), car_on_crossing(1)],
            vec![red(), car_on_crossing(1)],
        ],
        None,
    );

    let results: Vec<_> = session.map(|r| r.unwrap().result).collect();

    assert_eq!(results.len(), 4);
    assert!(results[0].crosswalk_bbox.is_some());
    assert_eq!(results[0].total_crossings, 0);

    let last = results.last().unwrap();
    assert_eq!(last.total_crossings, 1);
    assert_eq!(last.red_light_violations, 0);
    assert!(last.vehicle_states[&1].crossed);
    assert!(!last.vehicle_states[&1].crossed_on_red);
    assert!(store.is_empty());

    assert_eq!(calls.sink_written.load(Ordering::SeqCst), 4);
    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
    assert_eq!(calls.source_released.load(Ordering::SeqCst), 1);
}

#[test]
fn first_crossing_on_red_is_recorded_once() {
    let Fixture {
        session, store, ..
    } = fixture(
        5,
        vec![
            vec![green(), car_before_crossing(2)],
            vec![red(), car_on_crossing(2)],
            vec![red(), car_on_crossing(2)],
            vec![green(), car_on_crossing(2)],
            vec![red(), car_on_crossing(2)],
        ],
        None,
    );

    let results: Vec<_> = session.map(|r| r.unwrap().result).collect();
    let last = results.last().unwrap();

    assert_eq!(last.total_crossings, 1);
    assert_eq!(last.red_light_violations, 1);
    assert!(last.vehicle_states[&2].crossed_on_red);

    let mut reader = store.clone();
    let rows = reader.list_recent().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].vehicle_id, "2");
    // frame 1 at 30 fps
    assert_eq!(rows[0].video_second, Some(0));
    assert_eq!(rows[0].timestamp, None);
    assert_eq!(
        rows[0].processed_video_path.as_deref(),
        Some("output/processed_junction.mp4.avi")
    );
    assert_eq!(rows[0].original_video_path.as_deref(), Some("videos/junction.mp4"));
}

#[test]
fn without_lights_nothing_is_judged() {
    let Fixture { session, store, .. } = fixture(
        3,
        vec![
            vec![car_before_crossing(1)],
            vec![car_on_crossing(1), car_on_crossing(2)],
            vec![car_on_crossing(3)],
        ],
        None,
    );

    for result in session {
        let result = result.unwrap().result;
        assert!(result.crosswalk_bbox.is_none());
        assert_eq!(result.total_crossings, 0);
        assert!(result.vehicle_states.is_empty());
    }

    assert!(store.is_empty());
}

#[test]
fn crossing_is_located_once() {
    let Fixture { session, .. } = fixture(
        3,
        vec![
            vec![green()],
            vec![ObjectDetection::new(
                None,
                "red_light",
                BBox::<Ltrb>::ltrb(300.0, 400.0, 320.0, 450.0),
            )],
            vec![],
        ],
        None,
    );

    let regions: Vec<_> = session.map(|r| r.unwrap().result.crosswalk_bbox).collect();

    assert!(regions[0].is_some());
    assert_eq!(regions[0], regions[1]);
    assert_eq!(regions[1], regions[2]);
}

#[test]
fn cancellation_stops_within_one_frame() {
    let Fixture {
        mut session,
        calls,
        cancel,
        ..
    } = fixture(1000, vec![], None);

    assert!(session.next().unwrap().is_ok());
    assert!(session.next().unwrap().is_ok());

    cancel.cancel();
    assert!(session.next().is_none());
    assert!(session.next().is_none());

    assert_eq!(calls.sink_written.load(Ordering::SeqCst), 2);
    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
    assert_eq!(calls.source_released.load(Ordering::SeqCst), 1);

    drop(session);
    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
}

#[test]
fn detector_failure_ends_session() {
    let Fixture {
        mut session, calls, ..
    } = fixture(10, vec![vec![green(), car_on_crossing(1)]], Some(2));

    assert!(session.next().unwrap().is_ok());
    assert!(session.next().unwrap().is_ok());
    assert!(matches!(session.next(), Some(Err(Error::Detection(_)))));
    assert!(session.next().is_none());

    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
    assert_eq!(calls.source_released.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_source_is_an_error() {
    let Fixture {
        mut session, calls, ..
    } = fixture(0, vec![], None);

    assert!(matches!(session.next(), Some(Err(Error::Source(_)))));
    assert!(session.next().is_none());
    assert_eq!(calls.sink_written.load(Ordering::SeqCst), 0);
    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_early_releases_once() {
    let Fixture {
        mut session, calls, ..
    } = fixture(50, vec![], None);

    assert!(session.next().unwrap().is_ok());
    drop(session);

    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
    assert_eq!(calls.source_released.load(Ordering::SeqCst), 1);
}

#[test]
fn violations_never_exceed_crossings() {
    let mut script = Vec::new();
    for i in 0..12 {
        let light = if i % 3 == 0 { red() } else { green() };
        script.push(vec![
            light,
            car_on_crossing(i),
            car_before_crossing(i + 100),
            ObjectDetection::new(Some(-1), "truck", BBox::<Ltrb>::ltrb(0.0, 300.0, 50.0, 340.0)),
        ]);
    }

    let Fixture { session, store, .. } = fixture(12, script, None);

    let mut last = None;
    for result in session {
        let result = result.unwrap().result;
        assert!(result.red_light_violations <= result.total_crossings);
        assert_eq!(
            result.vehicle_states.values().filter(|s| s.crossed).count() as u32,
            result.total_crossings
        );
        assert!(!result.vehicle_states.contains_key(&-1));
        last = Some(result);
    }

    let last = last.unwrap();
    assert_eq!(last.total_crossings, 12);
    assert_eq!(last.red_light_violations, 4);
    assert_eq!(store.len(), 4);
    assert_eq!(last.vehicles[2].id, -1);
}

#[test]
fn annotated_frame_is_returned() {
    let Fixture { mut session, .. } = fixture(1, vec![vec![green(), car_on_crossing(1)]], None);

    let output = session.next().unwrap().unwrap();
    assert_eq!(output.image.cols(), 640);
    assert_eq!(output.image.rows(), 480);
    assert_eq!((output.result.frame_width, output.result.frame_height), (640, 480));
    assert_eq!(output.result.traffic_lights[0].label, "green_light");
}

struct FailingStore;

impl ViolationStore for FailingStore {
    fn insert(&mut self, _record: &ViolationRecord) -> Result<i64, Error> {
        Err(Error::Persistence("database is locked".into()))
    }

    fn list_recent(&mut self) -> Result<Vec<StoredViolation>, Error> {
        Ok(vec![])
    }
}

#[test]
fn storage_failure_keeps_the_session_running() {
    let calls = Calls::default();
    let session = synthetic_session(
        3,
        vec![
            vec![green(), car_before_crossing(2)],
            vec![red(), car_on_crossing(2)],
            vec![red(), car_on_crossing(2)],
        ],
        None,
        Box::new(FailingStore),
        &calls,
        CancelFlag::new(),
    );

    let results: Vec<_> = session.collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));

    let last = &results[2].as_ref().unwrap().result;
    assert_eq!(last.total_crossings, 1);
    assert_eq!(last.red_light_violations, 1);
    assert!(last.vehicle_states[&2].crossed_on_red);

    assert_eq!(calls.sink_written.load(Ordering::SeqCst), 3);
    assert_eq!(calls.sink_released.load(Ordering::SeqCst), 1);
}
