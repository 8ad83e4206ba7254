//! Run lifecycle: one script at a time, stoppable from other threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::api::GbHost;
use super::context::RunContext;
use super::events::{EventSink, LogEntry, LogKind, RunOutcome, Signal};
use super::fs::FileSource;
use crate::error::EngineError;
use crate::prng::Prng;
use crate::script::{build_gb, parse, Interpreter, Interrupt};

/// Stack for the interpreter thread; deep script recursion is tree-walker
/// recursion, so the call-depth limit must trip long before this runs out.
const RUN_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause at every loop iteration; zero only yields the thread.
    pub loop_yield: Duration,
    /// Seed for the per-run generator; `None` seeds from the clock.
    pub seed: Option<u64>,
    /// Granularity of `GB.Utils.sleep`, which wakes this often to check for a stop.
    pub sleep_slice: Duration,
    /// How often a pending confirmation re-checks for a stop.
    pub confirmation_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loop_yield: Duration::from_millis(30),
            seed: None,
            sleep_slice: Duration::from_millis(10),
            confirmation_poll: Duration::from_millis(25),
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_loop_yield(mut self, loop_yield: Duration) -> Self {
        self.loop_yield = loop_yield;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
    Completed,
    Errored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: u64,
    pub outcome: RunOutcome,
    /// Live source at the end of the run, after any self-edits.
    pub final_source: String,
    pub elapsed: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State visible to both the run thread and its controllers.
#[derive(Debug)]
pub(crate) struct Shared {
    running: AtomicBool,
    run_id: AtomicU64,
    state: Mutex<EngineState>,
    signals: Mutex<VecDeque<Signal>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            run_id: AtomicU64::new(0),
            state: Mutex::new(EngineState::Idle),
            signals: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn pop_signal(&self) -> Option<Signal> {
        lock(&self.signals).pop_front()
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
    }
}

/// Cloneable control surface for a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Queue a signal for `GB.Control.getSignal`. `STOP` also ends the run at
    /// the next checkpoint, whether or not the script reads it.
    pub fn push_signal(&self, signal: Signal) {
        // Clear the flag first: a script that reads STOP must already see it cleared.
        if signal == Signal::Stop {
            self.stop();
        }
        lock(&self.shared.signals).push_back(signal);
    }

    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!(run_id = self.run_id(), "stop requested");
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.shared.state)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn pending_signals(&self) -> Vec<Signal> {
        lock(&self.shared.signals).iter().copied().collect()
    }

    /// Id of the current run, or of the last one once idle; 0 before any run.
    pub fn run_id(&self) -> u64 {
        self.shared.run_id.load(Ordering::Acquire)
    }
}

pub struct Engine {
    config: EngineConfig,
    files: Option<Arc<dyn FileSource + Send + Sync>>,
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            files: None,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Attach the tree served by `GB.FileSystem`.
    pub fn with_files(mut self, files: Arc<dyn FileSource + Send + Sync>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run `source` to completion, blocking the caller. Events reach `sink`
    /// from the interpreter thread in emission order.
    pub fn run(
        &mut self,
        source: &str,
        sink: &mut (dyn EventSink + Send),
    ) -> Result<RunReport, EngineError> {
        let run_id = {
            let mut state = lock(&self.shared.state);
            if *state != EngineState::Idle {
                return Err(EngineError::AlreadyRunning {
                    run_id: self.shared.run_id.load(Ordering::Acquire),
                });
            }
            // Flag and queue are reset before `Running` becomes observable, so a
            // controller that sees `Running` can always stop this run.
            lock(&self.shared.signals).clear();
            self.shared.start();
            *state = EngineState::Running;
            self.shared.run_id.fetch_add(1, Ordering::AcqRel) + 1
        };

        let started = Instant::now();
        let rng = match self.config.seed {
            Some(seed) => Prng::new(seed),
            None => Prng::from_entropy(),
        };
        info!(run_id, bytes = source.len(), "run started");

        let config = &self.config;
        let shared: &Shared = &self.shared;
        let files = self.files.as_deref();
        let worker_sink = &mut *sink;
        let joined = thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name(format!("goober-run-{run_id}"))
                .stack_size(RUN_STACK_SIZE)
                .spawn_scoped(scope, move || {
                    execute(run_id, source, rng, config, shared, files, worker_sink)
                });
            match worker {
                Ok(handle) => handle.join().map_err(|payload| {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    error!(run_id, %reason, "run thread panicked");
                    "internal error".to_string()
                }),
                Err(e) => {
                    error!(run_id, "failed to spawn run thread: {e}");
                    Err(format!("failed to start run: {e}"))
                }
            }
        });
        let (outcome, final_source) = match joined {
            Ok(done) => done,
            Err(message) => {
                // The worker never reached its own closing lines.
                sink.on_log(LogEntry::new(
                    format!("{run_id}-abort"),
                    LogKind::Error,
                    format!("Runtime Error: {message}"),
                ));
                sink.on_log(LogEntry::new(
                    format!("{run_id}-end"),
                    LogKind::System,
                    "Execution Finished.",
                ));
                (RunOutcome::Errored { message }, source.to_string())
            }
        };

        self.shared.running.store(false, Ordering::Release);
        let terminal = match outcome {
            RunOutcome::Completed => EngineState::Completed,
            RunOutcome::Stopped => EngineState::Stopped,
            RunOutcome::Errored { .. } | RunOutcome::CompileFailed { .. } => EngineState::Errored,
        };
        self.shared.set_state(terminal);
        let elapsed = started.elapsed();
        info!(run_id, ?outcome, elapsed_ms = elapsed.as_millis() as u64, "run finished");
        self.shared.set_state(EngineState::Idle);

        Ok(RunReport {
            run_id,
            outcome,
            final_source,
            elapsed,
        })
    }
}

fn execute(
    run_id: u64,
    source: &str,
    rng: Prng,
    config: &EngineConfig,
    shared: &Shared,
    files: Option<&(dyn FileSource + Send + Sync)>,
    sink: &mut (dyn EventSink + Send),
) -> (RunOutcome, String) {
    let mut ctx = RunContext::new(run_id, source, rng);

    let program = match parse(source) {
        Ok(program) => program,
        Err(e) => {
            let message = e.to_string();
            debug!(run_id, %message, "compile failed");
            let id = ctx.next_log_id();
            sink.on_log(LogEntry::new(id, LogKind::Error, format!("Compiler Error: {message}")));
            return (RunOutcome::CompileFailed { message }, source.to_string());
        }
    };

    let mut host = GbHost::new(&mut ctx, sink, shared, config, files);
    let result = {
        let mut interp = Interpreter::new(&mut host);
        interp.define_global("GB", build_gb());
        interp.run(&program)
    };
    // A stop that arrived after the last checkpoint still ends the run as stopped.
    let result = match result {
        Ok(()) if !shared.is_running() => Err(Interrupt::Stopped),
        other => other,
    };
    let outcome = match result {
        Ok(()) => RunOutcome::Completed,
        Err(Interrupt::Stopped) => {
            host.emit(LogKind::System, "Execution stopped.");
            RunOutcome::Stopped
        }
        Err(Interrupt::Error(e)) => {
            host.emit(LogKind::Error, format!("Runtime Error: {}", e.message));
            RunOutcome::Errored { message: e.message }
        }
    };
    host.emit(LogKind::System, "Execution Finished.");
    drop(host);

    (outcome, ctx.code.text().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::{ConfirmationRequest, ModelCheckpoint, PlotEvent};
    use crate::runtime::fs::{tests::sample, FileNode};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        logs: Vec<LogEntry>,
        plots: Vec<PlotEvent>,
        code_updates: Vec<String>,
        checkpoints: Vec<ModelCheckpoint>,
        prompts: Vec<ConfirmationRequest>,
        /// Answer prompts inline with this value.
        auto_answer: Option<bool>,
        /// Push STOP when this message is logged.
        stop_on: Option<(String, EngineHandle)>,
        /// Panic once when this message is logged.
        panic_on: Option<String>,
    }

    impl Recorder {
        fn messages(&self) -> Vec<&str> {
            self.logs.iter().map(|l| l.message.as_str()).collect()
        }
    }

    impl EventSink for Recorder {
        fn on_log(&mut self, entry: LogEntry) {
            if self.panic_on.as_deref() == Some(entry.message.as_str()) {
                self.panic_on = None;
                panic!("sink failure");
            }
            if let Some((trigger, handle)) = &self.stop_on {
                if &entry.message == trigger {
                    handle.push_signal(Signal::Stop);
                }
            }
            self.logs.push(entry);
        }

        fn on_plot(&mut self, plot: PlotEvent) {
            self.plots.push(plot);
        }

        fn on_confirmation(&mut self, request: ConfirmationRequest) {
            if let Some(answer) = self.auto_answer {
                request.responder.answer(answer).unwrap();
            }
            self.prompts.push(request);
        }

        fn on_code_update(&mut self, source: &str) {
            self.code_updates.push(source.to_string());
        }

        fn on_checkpoint(&mut self, checkpoint: ModelCheckpoint) {
            self.checkpoints.push(checkpoint);
        }
    }

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::default()
                .with_seed(7)
                .with_loop_yield(Duration::ZERO),
        )
    }

    fn run(src: &str) -> (RunReport, Recorder) {
        let mut sink = Recorder::default();
        let report = engine().run(src, &mut sink).unwrap();
        (report, sink)
    }

    #[test]
    fn completed_run_ends_with_finished_line() {
        let (report, sink) = run("GB.Utils.log('hi'); console.log(1 + 1);");
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(sink.messages(), ["hi", "2", "Execution Finished."]);
        assert_eq!(sink.logs[2].kind, LogKind::System);
        assert_eq!(sink.logs[0].timestamp.len(), 8);
    }

    #[test]
    fn compile_error_is_one_line() {
        let (report, sink) = run("var x = ;");
        assert!(matches!(report.outcome, RunOutcome::CompileFailed { .. }));
        assert_eq!(sink.logs.len(), 1);
        assert_eq!(sink.logs[0].kind, LogKind::Error);
        assert!(sink.logs[0].message.starts_with("Compiler Error: Unexpected token ';'"));
    }

    #[test]
    fn runtime_error_then_finished() {
        let (report, sink) = run("let a; a.b.c = 1;");
        assert_eq!(
            report.outcome,
            RunOutcome::Errored {
                message: "Cannot read properties of undefined (reading 'b')".into()
            }
        );
        assert_eq!(
            sink.messages(),
            [
                "Runtime Error: Cannot read properties of undefined (reading 'b')",
                "Execution Finished."
            ]
        );
    }

    #[test]
    fn tensor_errors_surface_as_runtime_errors() {
        let (_, sink) = run("GB.zeros([3, 0]);");
        assert!(sink.logs[0].message.starts_with("Runtime Error: Invalid tensor shape"));
    }

    #[test]
    fn oversized_tensor_is_a_runtime_error() {
        let (report, sink) = run("GB.Tensor([4294967296, 4294967296], 'identity');");
        assert!(matches!(report.outcome, RunOutcome::Errored { .. }));
        assert_eq!(sink.logs.len(), 2);
        assert!(sink.logs[0].message.starts_with("Runtime Error: Tensor shape"));
        assert_eq!(sink.logs[1].message, "Execution Finished.");
    }

    #[test]
    fn panicking_run_still_reports_and_finishes() {
        let mut engine = engine();
        let mut sink = Recorder {
            panic_on: Some("boom".to_string()),
            ..Recorder::default()
        };
        let report = engine.run("GB.Utils.log('boom');", &mut sink).unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Errored {
                message: "internal error".into()
            }
        );
        assert_eq!(
            sink.messages(),
            ["Runtime Error: internal error", "Execution Finished."]
        );
        assert_eq!(sink.logs[0].kind, LogKind::Error);
        assert_eq!(engine.handle().state(), EngineState::Idle);
        let next = engine.run("GB.Utils.log('ok');", &mut sink).unwrap();
        assert_eq!(next.outcome, RunOutcome::Completed);
    }

    #[test]
    fn stop_signal_ends_an_endless_loop() {
        let mut engine = engine();
        let mut sink = Recorder {
            stop_on: Some(("ready".to_string(), engine.handle())),
            ..Recorder::default()
        };
        let src = "GB.Utils.log('ready'); let i = 0; while (true) { i++; }";
        let report = engine.run(src, &mut sink).unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(
            sink.messages(),
            ["ready", "Execution stopped.", "Execution Finished."]
        );
        assert_eq!(engine.handle().state(), EngineState::Idle);
    }

    #[test]
    fn stop_cannot_be_swallowed_by_try() {
        let mut engine = engine();
        let mut sink = Recorder {
            stop_on: Some(("ready".to_string(), engine.handle())),
            ..Recorder::default()
        };
        let src = "
            GB.Utils.log('ready');
            try { for (;;) {} } catch (e) { GB.Utils.log('caught'); }
            GB.Utils.log('after');
        ";
        let report = engine.run(src, &mut sink).unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert!(!sink.messages().contains(&"caught"));
        assert!(!sink.messages().contains(&"after"));
    }

    #[test]
    fn stop_from_another_thread() {
        let mut engine = engine();
        let handle = engine.handle();
        let stopper = thread::spawn(move || {
            while !handle.is_running() {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            handle.stop();
        });
        let mut sink = Recorder::default();
        let report = engine.run("while (true) {}", &mut sink).unwrap();
        stopper.join().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
    }

    #[test]
    fn signals_are_cleared_and_delivered_in_order() {
        let mut engine = engine();
        let handle = engine.handle();
        handle.push_signal(Signal::Pause);
        let mut sink = Recorder {
            stop_on: Some(("go".to_string(), handle.clone())),
            ..Recorder::default()
        };
        // The stale PAUSE from before the run is gone; STOP is queued by the sink.
        let src = "GB.Utils.log('go'); GB.Utils.log(GB.Control.getSignal()); GB.Utils.log(GB.Control.getSignal());";
        engine.run(src, &mut sink).unwrap();
        assert_eq!(&sink.messages()[..3], ["go", "STOP", "null"]);
        assert!(handle.pending_signals().is_empty());
    }

    #[test]
    fn reading_stop_and_finishing_still_counts_as_stopped() {
        let mut engine = engine();
        let mut sink = Recorder {
            stop_on: Some(("ready".to_string(), engine.handle())),
            ..Recorder::default()
        };
        let src = "GB.Utils.log('ready'); if (GB.Control.getSignal() === 'STOP') GB.Utils.log('saw stop');";
        let report = engine.run(src, &mut sink).unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(
            sink.messages(),
            ["ready", "saw stop", "Execution stopped.", "Execution Finished."]
        );
        assert_eq!(engine.handle().state(), EngineState::Idle);
    }

    #[test]
    fn polling_loop_that_breaks_on_stop_ends_as_stopped() {
        let mut engine = engine();
        let handle = engine.handle();
        let stopper = thread::spawn(move || {
            while !handle.is_running() {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            handle.push_signal(Signal::Stop);
        });
        let mut sink = Recorder::default();
        let src = "while (true) { var s = GB.Control.getSignal(); if (s === \"STOP\") break; }";
        let report = engine.run(src, &mut sink).unwrap();
        stopper.join().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(sink.messages(), ["Execution stopped.", "Execution Finished."]);
    }

    #[test]
    fn sleep_returns_early_on_stop() {
        let mut engine = engine();
        let mut sink = Recorder {
            stop_on: Some(("zzz".to_string(), engine.handle())),
            ..Recorder::default()
        };
        let started = Instant::now();
        let report = engine
            .run("GB.Utils.log('zzz'); GB.Utils.sleep(60000); while (true) {}", &mut sink)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.outcome, RunOutcome::Stopped);
    }

    #[test]
    fn confirmation_round_trip() {
        let mut sink = Recorder {
            auto_answer: Some(true),
            ..Recorder::default()
        };
        let report = engine()
            .run(
                "const ok = await GB.Control.requestConfirmation('Deploy?'); GB.Utils.log('answer ' + ok);",
                &mut sink,
            )
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(sink.prompts.len(), 1);
        assert_eq!(sink.prompts[0].message, "Deploy?");
        assert_eq!(sink.messages()[0], "answer true");
        // The run is over; the responder is stale now.
        assert!(sink.prompts[0].responder.answer(false).is_err());
    }

    #[test]
    fn confirmation_answered_from_another_thread() {
        struct Forward(mpsc::Sender<ConfirmationRequest>);
        impl EventSink for Forward {
            fn on_log(&mut self, _: LogEntry) {}
            fn on_plot(&mut self, _: PlotEvent) {}
            fn on_confirmation(&mut self, request: ConfirmationRequest) {
                self.0.send(request).unwrap();
            }
        }
        let (tx, rx) = mpsc::channel();
        let answerer = thread::spawn(move || {
            let request: ConfirmationRequest = rx.recv().unwrap();
            request.responder.answer(false).unwrap();
        });
        let mut sink = Forward(tx);
        let mut engine = engine();
        let src = "if (!GB.Control.requestConfirmation('go?')) { throw new Error('denied'); }";
        let report = engine.run(src, &mut sink).unwrap();
        answerer.join().unwrap();
        assert_eq!(report.outcome, RunOutcome::Errored { message: "denied".into() });
    }

    #[test]
    fn dropped_responder_counts_as_deny() {
        struct Ignore;
        impl EventSink for Ignore {
            fn on_log(&mut self, _: LogEntry) {}
            fn on_plot(&mut self, _: PlotEvent) {}
            fn on_confirmation(&mut self, _: ConfirmationRequest) {}
        }
        let mut engine = engine();
        let report = engine
            .run("if (GB.Control.requestConfirmation('?')) { throw 'approved'; }", &mut Ignore)
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
    }

    #[test]
    fn stop_ends_a_pending_confirmation() {
        let mut engine = engine();
        let mut sink = Recorder {
            stop_on: Some(("asking".to_string(), engine.handle())),
            ..Recorder::default()
        };
        let report = engine
            .run("GB.Utils.log('asking'); GB.Control.requestConfirmation('?');", &mut sink)
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert!(sink.prompts[0].responder.answer(true).is_err());
    }

    #[test]
    fn self_edit_updates_plasticity_and_next_train_intensity() {
        let src = "
            const a = GB.hive.HiveMind('A', { plasticity: 0.5 });
            const b = GB.hive.HiveMind('B', {});
            const cfg = { plasticity: 0.5 };
            GB.Code.selfEdit('plasticity: 0.5', 'plasticity: 0.95');
            GB.Utils.log(a.plasticity.toFixed(2) + ' ' + b.plasticity.toFixed(2));
        ";
        let (report, sink) = run(src);
        assert_eq!(report.outcome, RunOutcome::Completed);
        let msgs = sink.messages();
        assert_eq!(
            msgs[0],
            "[SelfEdit] Code Modified: 'plasticity: 0.5' -> 'plasticity: 0.95'"
        );
        assert_eq!(msgs[1], "[HotReload] Updated runtime plasticity to 0.95");
        assert_eq!(msgs[2], "[HotReload] Updated runtime plasticity to 0.95");
        assert_eq!(msgs[3], "0.95 0.95");
        assert_eq!(sink.code_updates.len(), 1);
        assert!(report.final_source.contains("plasticity: 0.95"));
        assert!(!report.final_source.contains("plasticity: 0.5"));
    }

    #[test]
    fn self_edit_miss_and_rollback() {
        let src = "
            GB.Utils.log(String(GB.Code.selfEdit('miss' + 'ing', 'x')));
            GB.Utils.log(String(GB.Code.rollback()));
            GB.Code.selfEdit('let n = 1', 'let n = 2');
            GB.Utils.log(String(GB.Code.rollback()));
            let n = 1;
        ";
        let (report, sink) = run(src);
        let msgs = sink.messages();
        assert_eq!(msgs[0], "[SelfEdit] Failed: Target 'missing' not found.");
        assert_eq!(sink.logs[0].kind, LogKind::Error);
        assert_eq!(msgs[1], "false");
        assert_eq!(msgs[2], "false");
        assert_eq!(msgs[4], "[Rollback] Reverted code.");
        assert_eq!(msgs[5], "true");
        assert_eq!(report.final_source, src);
        assert_eq!(sink.code_updates.len(), 2);
        assert_eq!(sink.code_updates[1], src);
    }

    #[test]
    fn plots_are_emitted_with_title_as_id() {
        let src = "
            for (let i = 0; i < 2; i++) {
                GB.Visual.plot({ title: 'Loss', xAxisKey: 'step', type: 'bar',
                    series: [{ key: 'loss', color: '#f00' }], data: [{ step: i, loss: 1 / (i + 1) }] });
            }
        ";
        let (_, sink) = run(src);
        assert_eq!(sink.plots.len(), 2);
        let mut board = crate::runtime::PlotBoard::new();
        for p in sink.plots.iter().cloned() {
            assert_eq!(p.id, "Loss");
            board.merge(p);
        }
        assert_eq!(board.len(), 1);
        assert_eq!(board.plots()[0].data.len(), 2);
        assert_eq!(board.plots()[0].data[1]["loss"], 0.5);
    }

    #[test]
    fn zeros_and_tensor_views() {
        let src = "
            const t = GB.zeros([3, 3]);
            GB.Utils.log(t.shape.join('x') + ' ' + t.data.length + ' ' + t.data.every(v => v === 0));
            t.data[4] = 2;
            GB.Utils.log(t.data[4]);
        ";
        let (_, sink) = run(src);
        assert_eq!(sink.messages()[..2], ["3x3 9 true", "2"]);
    }

    #[test]
    fn save_and_load_round_trip_within_a_run() {
        let src = "
            const m = GB.hive.HiveMind('Saver', { in: 3, out: 2 });
            GB.saveModel(m, 'saver.gbm');
            const back = GB.loadModel('saver.gbm');
            const x = [0.1, -0.2, 0.3];
            GB.Utils.log(JSON.stringify(m.forward(x)) === JSON.stringify(back.forward(x)));
            GB.Utils.log(String(GB.loadModel('missing.gbm')));
        ";
        let (_, sink) = run(src);
        let msgs = sink.messages();
        assert_eq!(msgs[0], "Model Saver saved to saver.gbm");
        assert_eq!(sink.logs[0].kind, LogKind::Success);
        assert_eq!(msgs[1..3], ["true", "null"]);
        assert_eq!(sink.checkpoints.len(), 1);
        assert_eq!(sink.checkpoints[0].model, "Saver");
        assert!(!sink.checkpoints[0].image.is_empty());
    }

    #[test]
    fn filesystem_is_read_only_view() {
        let files: Arc<dyn FileSource + Send + Sync> = Arc::new(sample as fn() -> Vec<FileNode>);
        let mut engine = engine().with_files(files);
        let src = "
            GB.Utils.log(GB.FileSystem.list('/').join(','));
            GB.Utils.log(GB.FileSystem.read('scripts/agi.gb'));
            GB.Utils.log(GB.FileSystem.exists('nope') + ' ' + GB.FileSystem.isDirectory('scripts'));
        ";
        let mut sink = Recorder::default();
        engine.run(src, &mut sink).unwrap();
        assert_eq!(
            sink.messages()[..3],
            ["scripts,README.md", "GB.Utils.log('agi')", "false true"]
        );
    }

    #[test]
    fn no_file_source_means_every_lookup_misses() {
        let (_, sink) = run("GB.Utils.log(GB.FileSystem.list('/').length + ' ' + GB.FileSystem.read('a'));");
        assert_eq!(sink.messages()[0], "0 null");
    }

    #[test]
    fn runs_do_not_share_state() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        engine
            .run("GB.Graph.createNode('a', {}); GB.Graph.link('a', 'b', 'r');", &mut sink)
            .unwrap();
        let mut sink = Recorder::default();
        let report = engine
            .run("GB.Utils.log(GB.Graph.query('a', 'r').length);", &mut sink)
            .unwrap();
        assert_eq!(report.run_id, 2);
        assert_eq!(sink.messages()[0], "0");
    }

    #[test]
    fn gpu_dispatch_needs_init() {
        let (report, sink) = run("GB.GPU.dispatch('shader', GB.zeros([1]));");
        assert_eq!(
            report.outcome,
            RunOutcome::Errored {
                message: "GPU not initialized.".into()
            }
        );
        assert_eq!(sink.messages()[0], "Runtime Error: GPU not initialized.");
    }

    #[test]
    fn deep_recursion_hits_the_depth_limit_not_the_stack() {
        let (report, _) = run("function f(n) { return f(n + 1); } f(0);");
        assert_eq!(
            report.outcome,
            RunOutcome::Errored {
                message: "Maximum call stack size exceeded".into()
            }
        );
    }
}
