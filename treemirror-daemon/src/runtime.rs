use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::MakeWriter;

use treemirror_core::MirrorConfig;

use crate::error::{io_err, DaemonError};
use crate::paths::{log_file_path, logs_dir, ROTATION_CHECK_INTERVAL};
use crate::scheduler::SyncScheduler;

/// Initialise logging, build a runtime, and run the scheduler until Ctrl-C or
/// SIGTERM.
pub fn start_blocking(config: MirrorConfig) -> Result<(), DaemonError> {
    let log_file = resolve_log_file(&config)?;
    init_tracing(config.verbosity(), log_file.clone());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config, log_file))
}

/// Run the scheduler as a console service until a shutdown signal arrives,
/// then stop it gracefully.
pub async fn run(config: MirrorConfig, log_file: Option<PathBuf>) -> Result<(), DaemonError> {
    let mut scheduler = SyncScheduler::new(config);
    scheduler.start()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let rotation_handle = log_file.map(|path| {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(log_rotation_task(path, shutdown_rx))
    });

    let signal = shutdown_signal().await;
    match &signal {
        Ok(name) => tracing::info!(signal = name, "received shutdown signal"),
        Err(err) => tracing::error!(error = %err, "signal handler failed, stopping"),
    }

    let stopped = scheduler.stop().await;
    let _ = shutdown_tx.send(());
    if let Some(handle) = rotation_handle {
        handle_join("log_rotation", handle.await)?;
    }
    signal?;
    stopped
}

async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| io_err("ctrl-c handler", e))?;
                Ok("ctrl-c")
            }
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| io_err("ctrl-c handler", e))?;
        Ok("ctrl-c")
    }
}

async fn log_rotation_task(
    log_file: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let path = log_file.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_log(&path);
                })
                .await
                .ok(); // rotation errors are logged inside rotate_log
            }
        }
    }
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Configured log file, resolved against the state directory, with its
/// parent directory created.
pub fn resolve_log_file(config: &MirrorConfig) -> Result<Option<PathBuf>, DaemonError> {
    let Some(configured) = &config.log_file else {
        return Ok(None);
    };
    let state_dir = config.state_dir()?;
    let path = log_file_path(&state_dir, configured);
    let dir = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| logs_dir(&state_dir));
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    Ok(Some(path))
}

/// `RUST_LOG` wins when set; otherwise verbosity 1/2/3 maps to
/// info/debug/trace.
pub fn filter_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn init_tracing(verbosity: u8, log_file: Option<PathBuf>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));
    let _ = match log_file {
        Some(path) => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(io::stdout.and(AppendFile { path }))
            .try_init(),
        None => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
}

/// Opens the log file in append mode for every event, so writes follow the
/// live file across rotations.
struct AppendFile {
    path: PathBuf,
}

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = Box<dyn io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(filter_directive(1), "info");
        assert_eq!(filter_directive(2), "debug");
        assert_eq!(filter_directive(3), "trace");
    }

    #[test]
    fn relative_log_file_is_created_under_state_logs() {
        let tmp = TempDir::new().unwrap();
        let mut config = MirrorConfig::new("/a", "/b");
        config.state_dir = Some(tmp.path().to_path_buf());
        config.log_file = Some(PathBuf::from("mirror.log"));

        let path = resolve_log_file(&config).unwrap().unwrap();
        assert_eq!(path, tmp.path().join("logs").join("mirror.log"));
        assert!(tmp.path().join("logs").is_dir());
    }

    #[test]
    fn no_log_file_configured() {
        let config = MirrorConfig::new("/a", "/b");
        assert!(resolve_log_file(&config).unwrap().is_none());
    }

    #[test]
    fn append_writer_creates_and_appends() {
        use std::io::Write;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.log");
        let writer = AppendFile { path: path.clone() };
        writer.make_writer().write_all(b"one\n").unwrap();
        writer.make_writer().write_all(b"two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn rotation_task_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = broadcast::channel::<()>(1);
        let handle = tokio::spawn(log_rotation_task(tmp.path().join("x.log"), rx));
        tokio::time::advance(ROTATION_CHECK_INTERVAL * 2).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
