use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::Deserialize;

use crate::crossing::CrossingLocatorConfig;
use crate::detection::DEFAULT_VEHICLE_LABELS;
use crate::error::Error;
use crate::pipeline::{SessionOptions, DEFAULT_FPS};

const DEFAULT_DB_PATH: &str = "violations.db";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_DUMPS_DIR: &str = "detections";
const DEFAULT_CHANNEL_CAPACITY: usize = 8;
const DEFAULT_JPEG_QUALITY: i32 = 90;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    db_path: Option<String>,
    output_dir: Option<PathBuf>,
    save_output: Option<bool>,
    default_fps: Option<f64>,
    channel_capacity: Option<usize>,
    join_timeout_secs: Option<u64>,
    jpeg_quality: Option<i32>,
    vehicle_labels: Option<Vec<String>>,
    locator: Option<CrossingLocatorConfig>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    dumps_dir: Option<PathBuf>,
    live_feed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// Holds `<video stem>.dets` files for file sources.
    pub dumps_dir: PathBuf,
    /// Line feed written by the tracker for live sources.
    pub live_feed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: String,
    pub output_dir: PathBuf,
    pub save_output: bool,
    pub default_fps: f64,
    pub channel_capacity: usize,
    /// `None` waits for the worker indefinitely.
    pub join_timeout: Option<Duration>,
    pub jpeg_quality: i32,
    pub vehicle_labels: Vec<String>,
    pub locator: CrossingLocatorConfig,
    pub detector: DetectorSettings,
}

impl Default for Config {
    fn default() -> Self {
        // An empty file leaves every setting at its default.
        Self::from_file(ConfigFile::default())
    }
}

impl Config {
    /// Defaults, then the TOML file named by `CROSSWALK_CONFIG`, then
    /// `CROSSWALK_*` overrides.
    pub fn load() -> Result<Self, Error> {
        let file_cfg = match std::env::var("CROSSWALK_CONFIG").ok().as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };

        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads a single TOML file without consulting the environment.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let cfg = Self::from_file(read_config_file(path.as_ref())?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            save_output: file.save_output.unwrap_or(true),
            default_fps: file.default_fps.unwrap_or(DEFAULT_FPS),
            channel_capacity: file.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            join_timeout: file.join_timeout_secs.map(Duration::from_secs),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            vehicle_labels: file.vehicle_labels.unwrap_or_else(|| {
                DEFAULT_VEHICLE_LABELS.iter().map(|s| s.to_string()).collect()
            }),
            locator: file.locator.unwrap_or_default(),
            detector: DetectorSettings {
                dumps_dir: detector
                    .dumps_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMPS_DIR)),
                live_feed: detector.live_feed,
            },
        }
    }

    fn apply_env(&mut self) -> Result<(), Error> {
        if let Some(path) = env_value("CROSSWALK_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_value("CROSSWALK_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(raw) = env_value("CROSSWALK_SAVE_OUTPUT") {
            self.save_output = parse_bool(&raw).ok_or_else(|| {
                Error::Config(format!("CROSSWALK_SAVE_OUTPUT must be a boolean, got {:?}", raw))
            })?;
        }
        if let Some(dir) = env_value("CROSSWALK_DUMPS_DIR") {
            self.detector.dumps_dir = PathBuf::from(dir);
        }
        if let Some(raw) = env_value("CROSSWALK_JOIN_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                Error::Config(format!(
                    "CROSSWALK_JOIN_TIMEOUT_SECS must be whole seconds, got {:?}",
                    raw
                ))
            })?;
            self.join_timeout = Some(Duration::from_secs(secs));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.db_path.trim().is_empty() {
            return Err(Error::Config("db_path must not be empty".into()));
        }
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            return Err(Error::Config("default_fps must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be at least 1".into()));
        }
        if !(0..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config("jpeg_quality must be within 0..=100".into()));
        }
        if self.vehicle_labels.iter().all(|l| l.trim().is_empty()) {
            return Err(Error::Config("vehicle_labels must name at least one class".into()));
        }
        if self.locator.block_size <= 1 || self.locator.block_size % 2 == 0 {
            return Err(Error::Config("locator.block_size must be odd and greater than 1".into()));
        }
        if self.locator.cluster_radius <= 0.0 {
            return Err(Error::Config("locator.cluster_radius must be positive".into()));
        }
        if self.locator.approx_epsilon <= 0.0 {
            return Err(Error::Config("locator.approx_epsilon must be positive".into()));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            vehicle_labels: self.vehicle_labels.clone(),
            default_fps: self.default_fps,
            locator: self.locator.clone(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::Config(format!("unable to read config {}: {}", path.display(), err))
    })?;

    Ok(toml::from_str(&raw)?)
}
