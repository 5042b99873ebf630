use std::fmt;
use std::path::{Path, PathBuf};

use opencv::{core::Mat, prelude::*, videoio};

use crate::error::Error;

/// Where a session reads its frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    File(PathBuf),
    Camera(i32),
}

impl VideoSource {
    /// Parses a client supplied source reference.
    ///
    /// `"webcam"` and `"0"` select the default camera, anything else must be
    /// an existing file.
    pub fn parse(reference: &str) -> Result<Self, Error> {
        match reference.trim() {
            "webcam" | "0" => Ok(VideoSource::Camera(0)),
            "" => Err(Error::Source("missing file path".into())),
            path if Path::new(path).is_file() => Ok(VideoSource::File(PathBuf::from(path))),
            path => Err(Error::Source(format!("invalid file path: {}", path))),
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, VideoSource::Camera(_))
    }

    /// Original file path, `None` for live sources.
    pub fn original_path(&self) -> Option<String> {
        match self {
            VideoSource::File(path) => Some(path.to_string_lossy().to_string()),
            VideoSource::Camera(_) => None,
        }
    }

    pub fn file_name(&self) -> Option<String> {
        match self {
            VideoSource::File(path) => path.file_name().map(|n| n.to_string_lossy().to_string()),
            VideoSource::Camera(_) => None,
        }
    }

    pub fn file_stem(&self) -> Option<String> {
        match self {
            VideoSource::File(path) => path.file_stem().map(|n| n.to_string_lossy().to_string()),
            VideoSource::Camera(_) => None,
        }
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::File(path) => write!(f, "{}", path.display()),
            VideoSource::Camera(idx) => write!(f, "camera #{}", idx),
        }
    }
}

/// Decoded frames in capture order.
pub trait FrameSource {
    /// Next frame and its capture position in seconds, `None` once exhausted.
    fn read(&mut self) -> Result<Option<(Mat, f32)>, Error>;

    /// Frame rate advertised by the container, if any.
    fn fps(&self) -> Option<f64>;

    fn release(&mut self) -> Result<(), Error>;
}

pub struct CaptureSource {
    cap: Option<videoio::VideoCapture>,
    fps: Option<f64>,
}

impl CaptureSource {
    pub fn open(source: &VideoSource) -> Result<Self, Error> {
        let cap = match source {
            VideoSource::File(path) => {
                videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?
            }
            VideoSource::Camera(idx) => videoio::VideoCapture::new(*idx, videoio::CAP_ANY)?,
        };

        let opened = videoio::VideoCapture::is_opened(&cap)?;
        if !opened {
            return Err(Error::Source(format!("unable to open {}", source)));
        }

        let fps = cap
            .get(videoio::CAP_PROP_FPS)
            .ok()
            .filter(|fps| fps.is_finite() && *fps > 0.0);

        Ok(Self {
            cap: Some(cap),
            fps,
        })
    }
}

impl FrameSource for CaptureSource {
    fn read(&mut self) -> Result<Option<(Mat, f32)>, Error> {
        let cap = match self.cap.as_mut() {
            Some(cap) => cap,
            None => return Ok(None),
        };

        let mut frame = Mat::default();
        if !cap.read(&mut frame)? {
            return Ok(None);
        }

        if frame.cols() == 0 || frame.rows() == 0 {
            return Ok(None);
        }

        let offset = cap.get(videoio::CAP_PROP_POS_MSEC).unwrap_or(0.0) / 1000.0;

        Ok(Some((frame, offset as f32)))
    }

    #[inline]
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn release(&mut self) -> Result<(), Error> {
        if let Some(mut cap) = self.cap.take() {
            cap.release()?;
        }

        Ok(())
    }
}
