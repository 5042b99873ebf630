use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("OpenCV Error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Sqlite Error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Config parse Error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Source Error: {0}")]
    Source(String),

    #[error("Detection Error: {0}")]
    Detection(String),

    #[error("Persistence Error: {0}")]
    Persistence(String),

    #[error("Sink Error: {0}")]
    Sink(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("worker did not stop within {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
