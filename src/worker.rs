use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use opencv::{
    core::{Mat, Vector},
    imgcodecs,
};

use crate::error::Error;
use crate::pipeline::{CancelFlag, FrameResult, Session};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// What the worker thread reports to whoever relays the session.
///
/// A failed session sends `Failed` and then `End`; `End` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Frame { result: FrameResult, jpeg: Vec<u8> },
    Failed(String),
    End,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub name: String,
    /// Messages buffered before the worker blocks on send.
    pub channel_capacity: usize,
    pub jpeg_quality: i32,
}

/// Handle to a session running on its own OS thread.
pub struct Worker {
    name: String,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

/// Starts a worker thread that builds its session with `factory` and
/// streams every processed frame through a bounded channel.
pub fn spawn<F>(
    options: WorkerOptions,
    cancel: CancelFlag,
    factory: F,
) -> Result<(Worker, Receiver<StreamMessage>), Error>
where
    F: FnOnce(CancelFlag) -> Result<Session, Error> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(options.channel_capacity.max(1));
    let thread_cancel = cancel.clone();
    let quality = options.jpeg_quality;
    let name = options.name.clone();

    let handle = thread::Builder::new()
        .name(format!("session-{}", options.name))
        .spawn(move || {
            log::debug!("{}: worker started", name);

            let session = match factory(thread_cancel) {
                Ok(session) => session,
                Err(err) => {
                    log::error!("{}: unable to start session: {}", name, err);
                    let _ = tx.send(StreamMessage::Failed(err.to_string()));
                    let _ = tx.send(StreamMessage::End);
                    return;
                }
            };

            run(&name, session, quality, &tx);
            let _ = tx.send(StreamMessage::End);
            log::debug!("{}: worker done", name);
        })?;

    Ok((
        Worker {
            name: options.name,
            cancel,
            handle: Some(handle),
        },
        rx,
    ))
}

fn run(name: &str, session: Session, quality: i32, tx: &SyncSender<StreamMessage>) {
    for item in session {
        match item {
            Ok(output) => {
                let jpeg = match encode_jpeg(&output.image, quality) {
                    Ok(jpeg) => jpeg,
                    Err(err) => {
                        log::warn!(
                            "{}: skipping frame {}: {}",
                            name,
                            output.result.frame_index,
                            err
                        );
                        continue;
                    }
                };

                let msg = StreamMessage::Frame {
                    result: output.result,
                    jpeg,
                };

                if tx.send(msg).is_err() {
                    log::debug!("{}: receiver gone, stopping", name);
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(StreamMessage::Failed(err.to_string()));
                break;
            }
        }
    }
}

pub fn encode_jpeg(image: &Mat, quality: i32) -> Result<Vec<u8>, Error> {
    let mut params = Vector::<i32>::new();
    params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
    params.push(quality);

    let mut buf = Vector::<u8>::new();
    if !imgcodecs::imencode(".jpg", image, &mut buf, &params)? {
        return Err(Error::Sink("jpeg encoder refused the frame".into()));
    }

    Ok(buf.to_vec())
}

impl Worker {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the thread, at most `timeout` when given. A worker that
    /// outlives the timeout is left detached.
    pub fn join(mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;

            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    log::warn!("{}: worker still running after {:?}", self.name, timeout);
                    return Err(Error::JoinTimeout(timeout));
                }

                thread::sleep(JOIN_POLL);
            }
        }

        handle.join().map_err(|_| Error::WorkerPanicked)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}
