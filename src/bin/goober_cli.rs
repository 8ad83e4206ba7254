//! CLI client for the `gooberd` daemon.
//!
//! Examples:
//!   goober-cli status
//!   goober-cli run scripts/agi.gb
//!   goober-cli signal BOOST_LR
//!   goober-cli confirm 4294967297 yes
//!   goober-cli watch
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use goober::runtime::{ConfirmationPrompt, EngineState, FileNode, PlotEvent, RuntimeEvent};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
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
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
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

fn usage() -> ! {
    eprintln!("goober-cli (talks to gooberd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: goober-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  run <path>                  Run a project script");
    eprintln!("  run-code <file>             Send a local file's code and run it");
    eprintln!("  run-all                     Run every .gb file in the project, concatenated");
    eprintln!("  stop                        Stop the active run");
    eprintln!("  signal <TOKEN>              Queue a control signal (STOP, BOOST_LR, ...)");
    eprintln!("  confirm <id> <yes|no>       Answer a pending confirmation");
    eprintln!("  status                      Show engine state");
    eprintln!("  files                       List the project tree");
    eprintln!("  plots                       Show merged plot data");
    eprintln!("  watch                       Stream run events until interrupted");
    eprintln!("  shutdown                    Stop any run and exit the daemon");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn connect(addr: &str, req: &Request) -> Result<(TcpStream, BufReader<TcpStream>), String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    let reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);

    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))?;
    Ok((stream, reader))
}

fn read_response(reader: &mut BufReader<TcpStream>) -> Result<Option<Response>, String> {
    let mut resp_line = String::new();
    let n = reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    if n == 0 {
        return Ok(None);
    }
    serde_json::from_str(&resp_line)
        .map(Some)
        .map_err(|e| format!("parse response: {e}"))
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let (stream, mut reader) = connect(addr, req)?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    read_response(&mut reader)?.ok_or_else(|| "connection closed".to_string())
}

fn print_event(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::Log(entry) => {
            println!("[{}] [{}] {}", entry.timestamp, entry.kind.as_str(), entry.message)
        }
        RuntimeEvent::Plot(plot) => println!("[plot] {} (+{} records)", plot.id, plot.data.len()),
        RuntimeEvent::Confirmation(p) => {
            println!("[confirm #{}] {}  (answer: goober-cli confirm {} yes|no)", p.id, p.message, p.id)
        }
        RuntimeEvent::CodeUpdate { source } => {
            println!("[code] live source updated ({} bytes)", source.len())
        }
        RuntimeEvent::Checkpoint { model, path, bytes, .. } => {
            println!("[checkpoint] {model} -> {path} ({bytes} bytes)")
        }
        RuntimeEvent::RunFinished { run_id, outcome, elapsed_ms } => {
            println!("[run {run_id}] finished after {elapsed_ms} ms: {outcome:?}")
        }
    }
}

fn print_files(files: &[FileNode]) {
    for f in files {
        let indent = "  ".repeat(f.depth.max(0) as usize);
        let suffix = if f.is_folder() { "/" } else { "" };
        println!("{indent}{}{suffix}", f.name);
    }
}

fn print_plots(plots: &[PlotEvent]) {
    if plots.is_empty() {
        println!("no plots");
    }
    for p in plots {
        let keys: Vec<&str> = p.series.iter().map(|s| s.key.as_str()).collect();
        println!("{} [{:?}] x={} series={}", p.title, p.kind, p.x_axis_key, keys.join(","));
        if let Some(last) = p.data.last() {
            println!("  {} records, last: {last}", p.data.len());
        }
    }
}

fn watch(addr: &str) -> Result<(), String> {
    let (_stream, mut reader) = connect(addr, &Request::Subscribe)?;
    while let Some(resp) = read_response(&mut reader)? {
        match resp {
            Response::Event { event } => print_event(&event),
            Response::Success { message } => println!("{message}"),
            Response::Error { message } => return Err(message),
            other => println!("{other:?}"),
        }
    }
    Ok(())
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let make_error = |msg: &str| -> ! {
        eprintln!("{}", msg);
        process::exit(1);
    };

    let req = match cmd.as_str() {
        "run" => {
            if args.len() < 2 {
                usage();
            }
            Request::Run {
                path: args[1].clone(),
            }
        }
        "run-code" => {
            if args.len() < 2 {
                usage();
            }
            let code = std::fs::read_to_string(&args[1])
                .unwrap_or_else(|e| make_error(&format!("read {}: {e}", args[1])));
            Request::RunCode { code }
        }
        "run-all" => Request::RunAll,
        "stop" => Request::Stop,
        "signal" => {
            if args.len() < 2 {
                usage();
            }
            Request::Signal {
                signal: args[1].clone(),
            }
        }
        "confirm" => {
            if args.len() < 3 {
                usage();
            }
            let id: u64 = args[1]
                .parse()
                .unwrap_or_else(|_| make_error("confirmation id must be a number"));
            let approved = match args[2].as_str() {
                "yes" | "y" => true,
                "no" | "n" => false,
                _ => make_error("answer must be yes or no"),
            };
            Request::Confirm { id, approved }
        }
        "status" => Request::Status,
        "files" => Request::ListFiles,
        "plots" => Request::Plots,
        "shutdown" => Request::Shutdown,
        "watch" => {
            if let Err(e) = watch(&addr) {
                eprintln!("Failed: {e}");
                process::exit(1);
            }
            process::exit(0);
        }
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Error { message }) => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
        Ok(Response::Status {
            state,
            run_id,
            source,
            pending_confirmations,
        }) => {
            println!(
                "state={state:?} run_id={run_id} source={}",
                source.as_deref().unwrap_or("-")
            );
            for p in pending_confirmations {
                println!("pending confirm #{}: {}", p.id, p.message);
            }
        }
        Ok(Response::Files { files }) => print_files(&files),
        Ok(Response::Plots { plots }) => print_plots(&plots),
        Ok(Response::Event { event }) => print_event(&event),
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}
