use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;

use crate::config::Config;
use crate::detector::{DetectionFeed, Detector, ReplayDetector};
use crate::error::Error;
use crate::pipeline::{CancelFlag, Session};
use crate::relay::{self, RelayOutcome, Transport};
use crate::sink::{self, VideoFileSink};
use crate::source::{CaptureSource, VideoSource};
use crate::storage::SqliteViolationStore;
use crate::worker::{self, StreamMessage, Worker, WorkerOptions};

pub type SessionId = u64;

/// Builds a ready-to-run session. Called on the worker thread.
pub trait SessionFactory: Send + Sync + 'static {
    fn create(&self, source: &VideoSource, cancel: CancelFlag) -> Result<Session, Error>;
}

/// Capture device or file, replayed detections, SQLite store and an
/// optional processed copy on disk.
pub struct CaptureSessionFactory {
    config: Config,
}

impl CaptureSessionFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn detector(&self, source: &VideoSource) -> Result<Box<dyn Detector>, Error> {
        let feed = match source {
            VideoSource::File(_) => {
                let stem = source.file_stem().ok_or_else(|| {
                    Error::Detection(format!("{} has no file name", source))
                })?;
                self.config.detector.dumps_dir.join(format!("{}.dets", stem))
            }
            VideoSource::Camera(_) => self.config.detector.live_feed.clone().ok_or_else(|| {
                Error::Detection("no detection feed configured for live sources".into())
            })?,
        };

        log::debug!("{}: replaying detections from {}", source, feed.display());
        Ok(Box::new(ReplayDetector::open(feed)?))
    }
}

impl SessionFactory for CaptureSessionFactory {
    fn create(&self, source: &VideoSource, cancel: CancelFlag) -> Result<Session, Error> {
        let capture = CaptureSource::open(source)?;
        let feed = DetectionFeed::new(Box::new(capture), self.detector(source)?);
        let store = SqliteViolationStore::open(&self.config.db_path)?;

        let session = Session::new(
            source.clone(),
            feed,
            Box::new(store),
            self.config.session_options(),
            cancel,
        );

        if !self.config.save_output {
            return Ok(session);
        }

        let path = sink::output_path(&self.config.output_dir, source, Local::now());
        let out = VideoFileSink::new(&path, session.fps());

        Ok(session.with_sink(Box::new(out), path.to_string_lossy()))
    }
}

/// Owns the registry of running sessions.
///
/// Every session gets its own worker, channel and track state; the
/// registry only maps ids to cancellation flags.
pub struct SessionManager<F> {
    factory: Arc<F>,
    channel_capacity: usize,
    jpeg_quality: i32,
    join_timeout: Option<Duration>,
    sessions: Mutex<HashMap<SessionId, CancelFlag>>,
    next_id: AtomicU64,
}

impl<F> SessionManager<F> {
    fn registry(&self) -> MutexGuard<'_, HashMap<SessionId, CancelFlag>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests a stop. Returns false when no such session is running.
    pub fn stop(&self, id: SessionId) -> bool {
        match self.registry().get(&id) {
            Some(cancel) => {
                cancel.cancel();
                log::info!("session {} stop requested", id);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.registry().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every running session.
    pub fn shutdown(&self) {
        for cancel in self.registry().values() {
            cancel.cancel();
        }
    }

    fn finish(&self, id: SessionId) {
        if let Some(cancel) = self.registry().remove(&id) {
            cancel.cancel();
            log::info!("session {} removed", id);
        }
    }
}

impl<F: SessionFactory> SessionManager<F> {
    pub fn new(factory: F, config: &Config) -> Self {
        Self {
            factory: Arc::new(factory),
            channel_capacity: config.channel_capacity,
            jpeg_quality: config.jpeg_quality,
            join_timeout: config.join_timeout,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns the worker for `source` and registers it.
    pub fn start(
        &self,
        source: VideoSource,
    ) -> Result<(SessionId, Worker, Receiver<StreamMessage>), Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelFlag::new();
        let factory = self.factory.clone();

        let options = WorkerOptions {
            name: id.to_string(),
            channel_capacity: self.channel_capacity,
            jpeg_quality: self.jpeg_quality,
        };

        let (worker, rx) = worker::spawn(options, cancel.clone(), move |cancel| {
            factory.create(&source, cancel)
        })?;

        self.registry().insert(id, cancel);
        log::info!("session {} started", id);

        Ok((id, worker, rx))
    }

    /// Runs one session for `source_ref` and relays it to `transport`
    /// until it ends. A reference that names no usable source is answered
    /// with an error event and nothing is started.
    pub async fn stream<T: Transport>(
        &self,
        source_ref: &str,
        transport: &mut T,
    ) -> Result<RelayOutcome, Error> {
        let source = match VideoSource::parse(source_ref) {
            Ok(source) => source,
            Err(err) => {
                log::warn!("rejecting source {:?}: {}", source_ref, err);
                transport
                    .send_error(&format!("invalid or missing file_path: {}", source_ref))
                    .await?;
                return Ok(RelayOutcome::Failed);
            }
        };

        let (id, worker, rx) = self.start(source)?;
        let _registration = Registration { manager: self, id };

        relay::relay(rx, worker, transport, self.join_timeout).await
    }
}

/// Unregisters a session when its stream ends, also when the stream
/// future is dropped before completion.
struct Registration<'a, F> {
    manager: &'a SessionManager<F>,
    id: SessionId,
}

impl<F> Drop for Registration<'_, F> {
    fn drop(&mut self) {
        self.manager.finish(self.id);
    }
}
