use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use opencv::{core, prelude::*, videoio};

use crate::error::Error;
use crate::source::VideoSource;

/// Receives annotated frames, e.g. to keep a processed copy of the video.
pub trait OutputSink {
    fn write(&mut self, frame: &core::Mat) -> Result<(), Error>;

    fn release(&mut self) -> Result<(), Error>;
}

/// Where the processed copy of `source` is written.
pub fn output_path(dir: &Path, source: &VideoSource, now: DateTime<Local>) -> PathBuf {
    let name = match source.file_name() {
        Some(base) => format!("processed_{}.avi", base),
        None => format!("processed_webcam_{}.avi", now.format("%Y%m%d_%H%M%S")),
    };

    dir.join(name)
}

/// Motion-JPEG container opened on the first frame with that frame's size.
pub struct VideoFileSink {
    writer: Option<videoio::VideoWriter>,
    size: Option<(i32, i32)>,
    out_file: PathBuf,
    fps: f64,
}

impl VideoFileSink {
    pub fn new<P: Into<PathBuf>>(out_file: P, fps: f64) -> Self {
        Self {
            writer: None,
            size: None,
            out_file: out_file.into(),
            fps,
        }
    }

    fn reinit(&mut self, size: (i32, i32)) -> Result<(), Error> {
        self.release()?;

        if let Some(dir) = self.out_file.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let writer = videoio::VideoWriter::new(
            &self.out_file.to_string_lossy(),
            videoio::VideoWriter::fourcc(b'M' as _, b'J' as _, b'P' as _, b'G' as _)?,
            self.fps,
            core::Size::new(size.0, size.1),
            true,
        )?;

        if !writer.is_opened()? {
            return Err(Error::Sink(format!(
                "unable to open {}",
                self.out_file.display()
            )));
        }

        log::debug!("writing {}x{} video to {}", size.0, size.1, self.out_file.display());
        self.size = Some(size);
        self.writer = Some(writer);

        Ok(())
    }
}

impl OutputSink for VideoFileSink {
    fn write(&mut self, frame: &core::Mat) -> Result<(), Error> {
        let size = (frame.cols(), frame.rows());

        if self.writer.is_none() || self.size != Some(size) {
            self.reinit(size)?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(frame)?;
        }

        Ok(())
    }

    fn release(&mut self) -> Result<(), Error> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(())
    }
}
