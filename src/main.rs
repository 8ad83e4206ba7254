//! Local runner: executes one GooberLang script in this process.
//!
//!   goober path/to/script.gb [--seed N] [--project DIR] [--yield-ms N]
//!
//! While a script runs, each stdin line is either a signal token (`STOP`,
//! `BOOST_LR`, ...) pushed to the engine, or `y`/`n` answering the oldest
//! pending confirmation.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use goober::runtime::{
    load_dir, ConfirmationRequest, ConfirmationResponder, Engine, EngineConfig, EngineHandle,
    EventSink, LogEntry, ModelCheckpoint, PlotBoard, PlotEvent, RunOutcome, Signal,
};
use tracing::warn;

struct Options {
    script: PathBuf,
    seed: Option<u64>,
    project: Option<PathBuf>,
    yield_ms: Option<u64>,
}

fn print_help() {
    println!("goober - run a GooberLang script locally\n");
    println!("Usage: goober <script> [--seed N] [--project DIR] [--yield-ms N]\n");
    println!("Options:");
    println!("  --seed N        Seed the run's random generator");
    println!("  --project DIR   Serve DIR through GB.FileSystem (default: the script's directory)");
    println!("  --yield-ms N    Pause at each loop iteration (default 30)");
    println!("\nWhile running, type a signal token (STOP, BOOST_LR, ...) or y/n to answer a prompt.");
}

fn parse_args() -> Result<Options, String> {
    let mut args = std::env::args().skip(1);
    let mut script = None;
    let mut seed = None;
    let mut project = None;
    let mut yield_ms = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" | "help" => {
                print_help();
                process::exit(0);
            }
            "--seed" => {
                let v = args.next().ok_or("--seed needs a value")?;
                seed = Some(v.parse().map_err(|_| format!("invalid seed: {v}"))?);
            }
            "--project" => {
                project = Some(PathBuf::from(args.next().ok_or("--project needs a directory")?));
            }
            "--yield-ms" => {
                let v = args.next().ok_or("--yield-ms needs a value")?;
                yield_ms = Some(v.parse().map_err(|_| format!("invalid --yield-ms: {v}"))?);
            }
            other if other.starts_with("--") => return Err(format!("Unknown option: {other}")),
            other => {
                if script.replace(PathBuf::from(other)).is_some() {
                    return Err("only one script can be run at a time".to_string());
                }
            }
        }
    }

    Ok(Options {
        script: script.ok_or("missing script path")?,
        seed,
        project,
        yield_ms,
    })
}

type Pending = Arc<Mutex<VecDeque<ConfirmationResponder>>>;

/// Prints events as they arrive and parks confirmation responders for stdin.
struct ConsoleSink {
    pending: Pending,
    plots: PlotBoard,
}

impl EventSink for ConsoleSink {
    fn on_log(&mut self, entry: LogEntry) {
        println!("[{}] [{}] {}", entry.timestamp, entry.kind.as_str(), entry.message);
    }

    fn on_plot(&mut self, plot: PlotEvent) {
        let records = plot.data.len();
        let id = plot.id.clone();
        self.plots.merge(plot);
        let total = self.plots.get(&id).map_or(records, |p| p.data.len());
        println!("[plot] {id}: +{records} records ({total} kept)");
    }

    fn on_confirmation(&mut self, request: ConfirmationRequest) {
        println!("[confirm #{}] {} [y/n]", request.id, request.message);
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(request.responder);
        }
    }

    fn on_code_update(&mut self, source: &str) {
        println!("[code] live source updated ({} bytes)", source.len());
    }

    fn on_checkpoint(&mut self, checkpoint: ModelCheckpoint) {
        println!(
            "[checkpoint] {} -> {} ({} bytes)",
            checkpoint.model,
            checkpoint.path,
            checkpoint.image.len()
        );
    }
}

fn answer_oldest(pending: &Pending, approved: bool) {
    let responder = pending.lock().ok().and_then(|mut p| p.pop_front());
    match responder {
        Some(r) => {
            if let Err(e) = r.answer(approved) {
                eprintln!("{e}");
            }
        }
        None => eprintln!("no confirmation is pending"),
    }
}

/// Feed stdin lines to the engine until stdin closes. The thread is left
/// behind when the run ends; the process exit reaps it.
fn spawn_stdin_reader(handle: EngineHandle, pending: Pending) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let token = line.trim();
            match token {
                "" => {}
                "y" | "yes" => answer_oldest(&pending, true),
                "n" | "no" => answer_oldest(&pending, false),
                _ => match token.parse::<Signal>() {
                    Ok(signal) => handle.push_signal(signal),
                    Err(e) => eprintln!("{e}"),
                },
            }
        }
    });
}

fn main() {
    tracing_subscriber::fmt::init();

    let options = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}\n");
        print_help();
        process::exit(2);
    });

    let source = std::fs::read_to_string(&options.script).unwrap_or_else(|e| {
        eprintln!("Failed to read {:?}: {e}", options.script);
        process::exit(1);
    });

    let mut config = EngineConfig::default();
    if let Some(seed) = options.seed {
        config = config.with_seed(seed);
    }
    if let Some(ms) = options.yield_ms {
        config = config.with_loop_yield(Duration::from_millis(ms));
    }

    let root = options.project.clone().unwrap_or_else(|| {
        options
            .script
            .parent()
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let files = move || {
        load_dir(&root).unwrap_or_else(|e| {
            warn!("Could not read project directory {:?}: {}", root, e);
            Vec::new()
        })
    };

    let mut engine = Engine::new(config).with_files(Arc::new(files));
    let pending: Pending = Arc::new(Mutex::new(VecDeque::new()));
    spawn_stdin_reader(engine.handle(), Arc::clone(&pending));

    let mut sink = ConsoleSink {
        pending,
        plots: PlotBoard::new(),
    };
    let report = match engine.run(&source, &mut sink) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if report.final_source != source {
        println!("[code] script was self-edited during the run (not written back)");
    }
    println!(
        "run {} finished in {:.2}s with {} plot(s)",
        report.run_id,
        report.elapsed.as_secs_f64(),
        sink.plots.len()
    );
    match report.outcome {
        RunOutcome::Completed | RunOutcome::Stopped => {}
        RunOutcome::Errored { .. } | RunOutcome::CompileFailed { .. } => process::exit(1),
    }
}
