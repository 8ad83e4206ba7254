//! Goober Daemon - background script runner for IDE clients
//!
//! The daemon owns one execution engine and a project directory, and serves
//! clients over a line-delimited JSON protocol:
//! - Run a project script, raw code, or the whole project
//! - Stop runs, queue control signals, answer confirmation prompts
//! - Stream run events (logs, plots, prompts, self-edits, checkpoints)
//!
//! Storage locations:
//! - Linux: ~/.local/share/gooberd/
//! - Windows: %APPDATA%\gooberd\
//! - MacOS: ~/Library/Application Support/gooberd/

use goober::runtime::{ConfirmationPrompt, EngineState, FileNode, FileSource, PlotEvent, RuntimeEvent, Signal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info, warn};

mod config;
mod daemon;
mod error;
mod paths;
mod project;

use config::DaemonConfig;
use daemon::{Daemon, RunOrigin};
use paths::AppPaths;
use project::Project;

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    Run { path: String },
    RunCode { code: String },
    RunAll,
    Stop,
    Signal { signal: String },
    Confirm { id: u64, approved: bool },
    Status,
    ListFiles,
    Plots,
    Subscribe,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Response {
    Success {
        message: String,
    },
    Error {
        message: String,
    },
    Status {
        state: EngineState,
        run_id: u64,
        source: Option<String>,
        pending_confirmations: Vec<ConfirmationPrompt>,
    },
    Files {
        files: Vec<FileNode>,
    },
    Plots {
        plots: Vec<PlotEvent>,
    },
    Event {
        event: RuntimeEvent,
    },
}

impl Response {
    fn success(message: impl Into<String>) -> Self {
        Response::Success {
            message: message.into(),
        }
    }

    fn error(message: impl ToString) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client Handler
// ═══════════════════════════════════════════════════════════════════════════

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &Response,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn start(daemon: &Arc<Daemon>, source: String, origin: RunOrigin) -> Response {
    let label = origin.label();
    match daemon.start_run(source, origin).await {
        Ok(_) => Response::success(format!("Running {label}")),
        Err(e) => Response::error(e),
    }
}

async fn handle_request(daemon: &Arc<Daemon>, request: Request) -> Response {
    match request {
        Request::Run { path } => match daemon.project().read_script(&path) {
            Ok(source) => start(daemon, source, RunOrigin::Script(path)).await,
            Err(e) => Response::error(e),
        },
        Request::RunCode { code } => start(daemon, code, RunOrigin::Code).await,
        Request::RunAll => match daemon.project().concat_scripts() {
            Ok(source) => start(daemon, source, RunOrigin::Project).await,
            Err(e) => Response::error(e),
        },
        Request::Stop => {
            daemon.stop();
            Response::success("Stop requested")
        }
        Request::Signal { signal } => match signal.parse::<Signal>() {
            Ok(sig) => {
                daemon.push_signal(sig);
                Response::success(format!("Signal {sig} queued"))
            }
            Err(e) => Response::error(e),
        },
        Request::Confirm { id, approved } => match daemon.confirm(id, approved).await {
            Ok(()) => Response::success(if approved { "Approved" } else { "Denied" }),
            Err(e) => Response::error(e),
        },
        Request::Status => {
            let s = daemon.status().await;
            Response::Status {
                state: s.state,
                run_id: s.run_id,
                source: s.source,
                pending_confirmations: s.pending_confirmations,
            }
        }
        Request::ListFiles => Response::Files {
            files: daemon.project().snapshot(),
        },
        Request::Plots => Response::Plots {
            plots: daemon.plots().await,
        },
        Request::Shutdown => {
            daemon.stop();
            info!("Shutdown requested");
            tokio::spawn(async {
                // Give the response a moment to flush before exiting.
                time::sleep(Duration::from_millis(50)).await;
                std::process::exit(0);
            });
            Response::success("Shutting down")
        }
        // Handled by the connection loop.
        Request::Subscribe => Response::error("Subscribe must be handled by the connection"),
    }
}

/// Turn the connection into an event stream until the client goes away.
async fn stream_events(
    writer: &mut OwnedWriteHalf,
    mut events: broadcast::Receiver<RuntimeEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    write_response(writer, &Response::success("Subscribed")).await?;
    loop {
        match events.recv().await {
            Ok(event) => write_response(writer, &Response::Event { event }).await?,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Subscriber lagged, {} events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    daemon: Arc<Daemon>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("Invalid request: {}", e),
                };
                write_response(&mut writer, &resp).await?;
                continue;
            }
        };

        if request == Request::Subscribe {
            return stream_events(&mut writer, daemon.subscribe()).await;
        }

        let response = handle_request(&daemon, request).await;
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Setup application paths and settings
    let paths = AppPaths::new()?;
    let config = DaemonConfig::load(&paths)?;
    info!("Data directory: {:?}", paths.data_dir());

    let project = Project::open_or_init(config.project_dir(&paths))?;
    info!("Project directory: {:?}", project.root());

    let daemon = Arc::new(Daemon::new(&config, paths, project));

    // Stop any active run on Ctrl-C so the interpreter thread winds down.
    {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                daemon.stop();
                info!("Ctrl-C: stopping");
                time::sleep(Duration::from_millis(50)).await;
                std::process::exit(0);
            }
        });
    }

    let listener = TcpListener::bind(&config.addr).await?;
    info!("Goober daemon listening on {}", config.addr);

    // Accept client connections
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let daemon = Arc::clone(&daemon);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, daemon).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}
