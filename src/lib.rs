pub mod bbox;
pub mod config;
pub mod crossing;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod pipeline;
pub mod relay;
pub mod session;
pub mod sink;
pub mod source;
pub mod storage;
pub mod violation;
pub mod worker;

pub use bbox::intersection_area;
pub use config::Config;
pub use crossing::CrossingLocator;
pub use detection::ObjectDetection;
pub use error::Error;
pub use frame::DetectionFrame;
pub use pipeline::{CancelFlag, FrameOutput, FrameResult, Session, SessionOptions};
pub use relay::{relay, RelayOutcome, Transport};
pub use session::{CaptureSessionFactory, SessionFactory, SessionManager};
pub use violation::{CrossingMonitor, SessionCounters, TrackState};
pub use worker::StreamMessage;
