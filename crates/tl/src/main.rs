mod config;
mod log;

use crate::config::{Config, ConfigError};
use clap::{Parser, Subcommand};
use owo_colors::{OwoColorize, Stream};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tl_core::error::StoreError;
use tl_core::pending::PendingRepository;
use tl_core::store::Store;
use tl_core::types::{IdError, PendingSession, SessionId};
use tl_core::window::{SessionWindow, WindowEnd};
use tl_core::{ImagingScheduler, SchedulerError, TokioAlarms};
use tl_db::{DbStore, RecordingCapture, SharedStore};
use tl_events::{EventBus, EventRecord, EventStore};
use tl_export::ExportError;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "tl", version, about = "Timelapse session scheduler")]
struct Cli {
    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    db_path: Option<String>,
    /// Log filter, e.g. `info` or `tl_core=debug`.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Arms every pending session and fires them until Ctrl-C.
    Run,
    Pending,
    Sessions,
    /// Audit log, optionally for one request code.
    Events {
        #[arg(long)]
        request: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    Export {
        session_id: String,
        path: PathBuf,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };
    log::init(&config.log_filter);

    let result = match cli.command {
        Command::Run => run(&config).await,
        Command::Pending => print_pending(&config),
        Command::Sessions => print_sessions(&config).await,
        Command::Events { request, limit } => print_events(&config, request.as_deref(), limit),
        Command::Export { session_id, path } => export(&config, &session_id, &path).await,
    };
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".if_supports_color(Stream::Stderr, |text| text.red()));
            std::process::ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config =
        Config::load(cli.config.as_deref())?.apply_env(|key| std::env::var(key).ok())?;
    if let Some(db_path) = &cli.db_path {
        config.db_path.clone_from(db_path);
    }
    if let Some(filter) = &cli.log {
        config.log_filter.clone_from(filter);
    }
    Ok(config)
}

fn open_db(config: &Config) -> Result<rusqlite::Connection, AppError> {
    if let Some(parent) = Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(tl_db::schema::open_and_migrate(&config.db_path)?)
}

async fn run(config: &Config) -> Result<(), AppError> {
    let store = SharedStore::new(DbStore::new(open_db(config)?));
    let audit = EventStore::new(tl_db::schema::open(&config.db_path)?)?;

    let event_bus = EventBus::new(config.event_capacity);
    let events = event_bus.subscribe();
    let recorder = tokio::task::spawn_blocking(move || record_events(&audit, events));

    let (alarms, fired) = TokioAlarms::new();
    let capture = RecordingCapture::new(
        store.clone(),
        config.device_info(),
        env!("CARGO_PKG_VERSION"),
    );
    let scheduler = ImagingScheduler::new(store, alarms, capture, event_bus);
    let (handle, task) = scheduler.spawn(fired, config.command_capacity).await?;
    let pending = handle.list_pending().await?;
    tracing::info!(pending = pending.len(), db_path = %config.db_path, "scheduler running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await?;
    task.await?;
    recorder.await?;
    Ok(())
}

/// Appends every published record to the audit log until the bus closes.
fn record_events(audit: &EventStore, mut events: broadcast::Receiver<EventRecord>) {
    loop {
        match events.blocking_recv() {
            Ok(event) => {
                if let Err(err) = audit.append(event) {
                    tracing::warn!(error = %err, "could not record event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_pending(config: &Config) -> Result<(), AppError> {
    let store = DbStore::new(open_db(config)?);
    let pending = store.pending().list()?;
    if pending.is_empty() {
        println!("no pending sessions");
    }
    for session in &pending {
        println!("{}", describe_pending(session));
    }
    Ok(())
}

fn describe_pending(pending: &PendingSession) -> String {
    let window = SessionWindow::from_settings(pending.scheduled_start, &pending.settings);
    let end = match window.end {
        WindowEnd::At(end) => end.to_rfc3339(),
        WindowEnd::Unbounded => "until stopped".to_string(),
    };
    format!(
        "{}  {}  {} -> {}  every {}s",
        pending
            .request_code
            .if_supports_color(Stream::Stdout, |text| text.dimmed()),
        pending.name.if_supports_color(Stream::Stdout, |text| text.bold()),
        window.start.to_rfc3339(),
        end,
        pending.settings.frame_interval_secs(),
    )
}

async fn print_sessions(config: &Config) -> Result<(), AppError> {
    let store = SharedStore::new(DbStore::new(open_db(config)?));
    for session in store.sessions().await? {
        let ended = session
            .ended_at
            .map_or_else(|| "-".to_string(), |ended| ended.to_rfc3339());
        println!(
            "{}  {:<9}  {}  {} -> {}",
            session.id.if_supports_color(Stream::Stdout, |text| text.dimmed()),
            format!("{:?}", session.status),
            session.name.if_supports_color(Stream::Stdout, |text| text.bold()),
            session.started_at.to_rfc3339(),
            ended,
        );
    }
    Ok(())
}

fn print_events(config: &Config, request: Option<&str>, limit: u32) -> Result<(), AppError> {
    open_db(config)?;
    let audit = EventStore::new(tl_db::schema::open(&config.db_path)?)?;
    let events = match request {
        Some(code) => audit.for_request(code)?,
        None => audit.list(None, Some(limit))?,
    };
    for event in events {
        let kind = event
            .body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("?")
            .to_string();
        println!(
            "{:>5}  {}  {:<8}  {}  {}",
            event.seq,
            event.at.to_rfc3339(),
            event.source.as_str(),
            kind.if_supports_color(Stream::Stdout, |text| text.cyan()),
            event.request_code.unwrap_or_default(),
        );
    }
    Ok(())
}

async fn export(config: &Config, session_id: &str, path: &Path) -> Result<(), AppError> {
    let session_id: SessionId = session_id.parse()?;
    let store = SharedStore::new(DbStore::new(open_db(config)?));
    let (session, frames) = store.session_with_frames(&session_id).await?;
    tl_export::export_session_to_path(&session, &frames, path)?;
    println!("wrote {} frames to {}", frames.len(), path.display());
    Ok(())
}
