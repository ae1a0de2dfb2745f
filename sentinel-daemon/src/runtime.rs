use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use sentinel_core::{DirectoryStore, RecordStore};

use crate::config::ControllerConfig;
use crate::error::{io_err, DaemonError};
use crate::inflight::InFlightSet;
use crate::paths::{sentinel_root, socket_path};
use crate::protocol::{parse_request, ControlReply, ControlRequest};
use crate::scheduler::Scheduler;
use crate::stats::{unix_seconds_now, ControllerStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// What the status command reports; cheap to clone into each client task.
#[derive(Clone)]
struct StatusContext {
    stats: Arc<ControllerStats>,
    in_flight: InFlightSet,
    started_at_unix: u64,
    store_root: PathBuf,
    config: ControllerConfig,
}

/// Start the controller and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    config: ControllerConfig,
    log_format: LogFormat,
) -> Result<(), DaemonError> {
    init_tracing(log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the controller against the directory store named by `config`.
pub async fn run(home: PathBuf, config: ControllerConfig) -> Result<(), DaemonError> {
    config.validate()?;
    let store_root = config.store_root_or(&home);
    let store: Arc<dyn RecordStore> = Arc::new(DirectoryStore::new(&store_root));
    run_with_store(home, config, store, store_root).await
}

/// Run scheduler, control socket, and signal handler until any of them asks
/// for shutdown.
pub async fn run_with_store(
    home: PathBuf,
    config: ControllerConfig,
    store: Arc<dyn RecordStore>,
    store_root: PathBuf,
) -> Result<(), DaemonError> {
    config.validate()?;
    ensure_runtime_dirs(&home)?;

    let scheduler = Scheduler::new(store, &config);
    let status = StatusContext {
        stats: scheduler.stats(),
        in_flight: scheduler.in_flight(),
        started_at_unix: unix_seconds_now(),
        store_root,
        config,
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = scheduler.run(shutdown.clone()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(home, status, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down controller");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task {
                            task: "signal_handler",
                            message: err.to_string(),
                        }),
                    }
                }
            }
        })
    };

    let (scheduler_result, socket_result, signal_result) =
        tokio::join!(scheduler_handle, socket_handle, signal_handle);

    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    status: StatusContext,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let status = status.clone();
                let shutdown_tx = shutdown_tx.clone();
                let socket_display = socket.display().to_string();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, status, shutdown_tx, socket_display).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    status: StatusContext,
    shutdown_tx: broadcast::Sender<()>,
    socket: String,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("control socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(&mut writer, &ControlReply::error(err.to_string())).await?;
                continue;
            }
        };

        match request {
            ControlRequest::Status => {
                let reply = ControlReply::ok(build_status_payload(&status, &socket));
                write_response(&mut writer, &reply).await?;
            }
            ControlRequest::Stop => {
                tracing::info!("stop requested over control socket");
                let reply = ControlReply::ok(json!({ "stopping": true }));
                let written = write_response(&mut writer, &reply).await;
                let _ = shutdown_tx.send(());
                written?;
                break;
            }
        }
    }

    Ok(())
}

fn build_status_payload(status: &StatusContext, socket: &str) -> Value {
    let stats = status.stats.snapshot();
    let config = &status.config;
    json!({
        "running": true,
        "started_at_unix": status.started_at_unix,
        "last_cycle_at_unix": stats.last_cycle_at_unix,
        "cycles": stats.cycles,
        "skipped_cycles": stats.skipped_cycles,
        "dispatched": stats.dispatched,
        "updated": stats.updated,
        "unchanged": stats.unchanged,
        "failed": stats.failed,
        "in_flight": status.in_flight.len(),
        "socket": socket,
        "store_root": status.store_root.display().to_string(),
        "config": {
            "namespace": config.namespace,
            "poll_interval_ms": config.poll_interval_ms,
            "concurrency": config.concurrency,
            "publish_scan_errors": config.publish_scan_errors,
        },
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale control socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = sentinel_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &ControlReply,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("control socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("control socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("control socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
