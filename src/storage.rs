use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat};
use rusqlite::{params, Connection};
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// When a violation happened: wall clock for live sources, whole seconds
/// into the video for files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViolationTime {
    WallClock(DateTime<Local>),
    VideoSecond(u64),
}

impl ViolationTime {
    /// Second of the video that contains frame `frame_idx` (0-based).
    #[inline]
    pub fn from_frame(frame_idx: u64, fps: f64) -> Self {
        ViolationTime::VideoSecond(((frame_idx + 1) as f64 / fps).floor() as u64)
    }

    pub fn timestamp(&self) -> Option<String> {
        match self {
            ViolationTime::WallClock(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Secs, false)),
            ViolationTime::VideoSecond(_) => None,
        }
    }

    pub fn video_second(&self) -> Option<u64> {
        match self {
            ViolationTime::WallClock(_) => None,
            ViolationTime::VideoSecond(sec) => Some(*sec),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    pub vehicle_id: String,
    pub time: ViolationTime,
    pub processed_video_path: Option<String>,
    pub original_video_path: Option<String>,
}

/// A violation as read back from the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredViolation {
    pub id: i64,
    pub vehicle_id: String,
    pub timestamp: Option<String>,
    pub video_second: Option<u64>,
    pub processed_video_path: Option<String>,
    pub original_video_path: Option<String>,
}

pub trait ViolationStore {
    /// Persists one record and returns its id.
    fn insert(&mut self, record: &ViolationRecord) -> Result<i64, Error>;

    /// All records, most recent first.
    fn list_recent(&mut self) -> Result<Vec<StoredViolation>, Error>;
}

pub struct SqliteViolationStore {
    conn: Connection,
}

impl SqliteViolationStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, Error> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<(), Error> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              vehicle_id TEXT NOT NULL,
              timestamp TEXT,
              video_second INTEGER,
              processed_video_path TEXT,
              original_video_path TEXT
            );
            "#,
        )?;
        Ok(())
    }
}

impl ViolationStore for SqliteViolationStore {
    fn insert(&mut self, record: &ViolationRecord) -> Result<i64, Error> {
        let video_second = record
            .time
            .video_second()
            .map(i64::try_from)
            .transpose()
            .map_err(|_| Error::Persistence("video second exceeds i64 range".into()))?;

        self.conn.execute(
            r#"
            INSERT INTO violations(
                vehicle_id, timestamp, video_second, processed_video_path, original_video_path
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.vehicle_id,
                record.time.timestamp(),
                video_second,
                record.processed_video_path,
                record.original_video_path,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn list_recent(&mut self) -> Result<Vec<StoredViolation>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, vehicle_id, timestamp, video_second,
                    processed_video_path, original_video_path
             FROM violations ORDER BY id DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let video_second: Option<i64> = row.get(3)?;
            Ok(StoredViolation {
                id: row.get(0)?,
                vehicle_id: row.get(1)?,
                timestamp: row.get(2)?,
                video_second: video_second.map(|s| s.max(0) as u64),
                processed_video_path: row.get(4)?,
                original_video_path: row.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }

        Ok(out)
    }
}

/// Shared in-process store; clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryViolationStore {
    records: Arc<Mutex<Vec<StoredViolation>>>,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn insert(&mut self, record: &ViolationRecord) -> Result<i64, Error> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Persistence("violation store poisoned".into()))?;

        let id = records.len() as i64 + 1;
        records.push(StoredViolation {
            id,
            vehicle_id: record.vehicle_id.clone(),
            timestamp: record.time.timestamp(),
            video_second: record.time.video_second(),
            processed_video_path: record.processed_video_path.clone(),
            original_video_path: record.original_video_path.clone(),
        });

        Ok(id)
    }

    fn list_recent(&mut self) -> Result<Vec<StoredViolation>, Error> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Persistence("violation store poisoned".into()))?;

        Ok(records.iter().rev().cloned().collect())
    }
}
