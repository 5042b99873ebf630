//! crosswalk-watch - red-light crossing detection over a video file or camera

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncWriteExt, Stdout};

use crosswalk_watch::relay::{error_envelope, frame_envelope};
use crosswalk_watch::storage::{SqliteViolationStore, ViolationStore};
use crosswalk_watch::{
    CaptureSessionFactory, Config, Error, FrameResult, RelayOutcome, SessionManager, Transport,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// SQLite database holding recorded violations.
    #[arg(long, env = "CROSSWALK_DB_PATH")]
    db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video file, or `webcam` / `0` for the default camera.
    Run {
        source: String,
        /// Also store every annotated frame as a JPEG in this directory.
        #[arg(long)]
        frames_dir: Option<PathBuf>,
        /// Do not write the processed video.
        #[arg(long)]
        no_save: bool,
    },
    /// Print recorded violations, newest first.
    Violations,
}

/// Streams frame metadata to stdout as JSON lines.
struct StdoutTransport {
    out: Stdout,
    frames_dir: Option<PathBuf>,
    last_index: u64,
}

impl StdoutTransport {
    async fn line(&mut self, line: &str) -> Result<(), Error> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }
}

impl Transport for StdoutTransport {
    async fn send_metadata(&mut self, result: &FrameResult) -> Result<(), Error> {
        self.last_index = result.frame_index;
        let line = frame_envelope(result)?;
        self.line(&line).await
    }

    async fn send_image(&mut self, jpeg: &[u8]) -> Result<(), Error> {
        if let Some(dir) = &self.frames_dir {
            let path = dir.join(format!("frame_{:06}.jpg", self.last_index));
            tokio::fs::write(&path, jpeg).await?;
        }
        Ok(())
    }

    async fn send_error(&mut self, message: &str) -> Result<(), Error> {
        let line = error_envelope(message);
        self.line(&line).await
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    match args.command {
        Command::Violations => {
            let mut store = SqliteViolationStore::open(&config.db_path)?;
            let rows = store.list_recent()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            source,
            frames_dir,
            no_save,
        } => {
            if no_save {
                config.save_output = false;
            }
            if let Some(dir) = &frames_dir {
                tokio::fs::create_dir_all(dir).await?;
            }

            let manager = Arc::new(SessionManager::new(
                CaptureSessionFactory::new(config.clone()),
                &config,
            ));

            let on_signal = manager.clone();
            if let Err(err) = ctrlc::set_handler(move || {
                log::info!("interrupted, stopping sessions");
                on_signal.shutdown();
            }) {
                log::warn!("unable to install Ctrl-C handler: {}", err);
            }

            let mut transport = StdoutTransport {
                out: tokio::io::stdout(),
                frames_dir,
                last_index: 0,
            };

            let outcome = manager.stream(&source, &mut transport).await?;
            log::info!("{}: {:?}", source, outcome);

            Ok(match outcome {
                RelayOutcome::Failed => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
    }
}
