//! State shared by every client connection and the run worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use goober::error::EngineError;
use goober::runtime::{
    ConfirmationPrompt, ConfirmationRequest, Engine, EngineHandle, EngineState, EventSink,
    LogEntry, ModelCheckpoint, PlotBoard, PlotEvent, RunReport, RuntimeEvent, Signal,
};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::paths::AppPaths;
use crate::project::Project;

/// Where the source of a run came from. Only single scripts get their
/// self-edits written back.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOrigin {
    Script(String),
    Code,
    Project,
}

impl RunOrigin {
    pub fn label(&self) -> String {
        match self {
            RunOrigin::Script(path) => path.clone(),
            RunOrigin::Code => "<code>".to_string(),
            RunOrigin::Project => "<project>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub run_id: u64,
    pub source: Option<String>,
    pub pending_confirmations: Vec<ConfirmationPrompt>,
}

#[derive(Default)]
struct DaemonState {
    plots: PlotBoard,
    /// Prompts the current run is blocked on, by id.
    pending: BTreeMap<u64, ConfirmationRequest>,
    current: Option<String>,
}

pub struct Daemon {
    paths: AppPaths,
    project: Project,
    engine: Arc<Mutex<Engine>>,
    handle: EngineHandle,
    events: broadcast::Sender<RuntimeEvent>,
    state: RwLock<DaemonState>,
}

impl Daemon {
    pub fn new(config: &DaemonConfig, paths: AppPaths, project: Project) -> Self {
        let engine = Engine::new(config.engine_config()).with_files(Arc::new(project.clone()));
        let handle = engine.handle();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            paths,
            project,
            engine: Arc::new(Mutex::new(engine)),
            handle,
            events,
            state: RwLock::new(DaemonState::default()),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RuntimeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Start `source` on the blocking pool. Fails while another run holds
    /// the engine.
    pub async fn start_run(
        self: &Arc<Self>,
        source: String,
        origin: RunOrigin,
    ) -> Result<JoinHandle<Option<RunReport>>, DaemonError> {
        let engine = Arc::clone(&self.engine)
            .try_lock_owned()
            .map_err(|_| EngineError::AlreadyRunning {
                run_id: self.handle.run_id(),
            })?;
        {
            let mut state = self.state.write().await;
            state.plots.clear();
            state.pending.clear();
            state.current = Some(origin.label());
        }
        info!("Starting run from {}", origin.label());
        let daemon = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || {
            run_worker(daemon, engine, source, origin)
        }))
    }

    pub fn stop(&self) {
        self.handle.push_signal(Signal::Stop);
    }

    pub fn push_signal(&self, signal: Signal) {
        self.handle.push_signal(signal);
    }

    pub async fn confirm(&self, id: u64, approved: bool) -> Result<(), DaemonError> {
        let request = self
            .state
            .write()
            .await
            .pending
            .remove(&id)
            .ok_or(DaemonError::NoPendingConfirmation(id))?;
        request.responder.answer(approved)?;
        Ok(())
    }

    pub async fn status(&self) -> StatusSnapshot {
        let state = self.state.read().await;
        StatusSnapshot {
            state: self.handle.state(),
            run_id: self.handle.run_id(),
            source: state.current.clone(),
            pending_confirmations: state.pending.values().map(ConfirmationRequest::prompt).collect(),
        }
    }

    pub async fn plots(&self) -> Vec<PlotEvent> {
        self.state.read().await.plots.plots().to_vec()
    }
}

fn run_worker(
    daemon: Arc<Daemon>,
    mut engine: OwnedMutexGuard<Engine>,
    source: String,
    origin: RunOrigin,
) -> Option<RunReport> {
    let mut sink = DaemonSink {
        daemon: Arc::clone(&daemon),
        origin,
    };
    let result = engine.run(&source, &mut sink);
    {
        let mut state = daemon.state.blocking_write();
        state.pending.clear();
        state.current = None;
    }
    // Release the engine before announcing the end so a client reacting to
    // `RunFinished` can start the next run straight away.
    drop(engine);

    match result {
        Ok(report) => {
            daemon.publish(RuntimeEvent::RunFinished {
                run_id: report.run_id,
                outcome: report.outcome.clone(),
                elapsed_ms: report.elapsed.as_millis() as u64,
            });
            Some(report)
        }
        Err(e) => {
            error!("Run rejected: {}", e);
            None
        }
    }
}

/// Forwards engine events to subscribers and mirrors them into daemon state.
/// Runs on the interpreter thread, so locks are taken with `blocking_*`.
struct DaemonSink {
    daemon: Arc<Daemon>,
    origin: RunOrigin,
}

impl EventSink for DaemonSink {
    fn on_log(&mut self, entry: LogEntry) {
        self.daemon.publish(RuntimeEvent::Log(entry));
    }

    fn on_plot(&mut self, plot: PlotEvent) {
        self.daemon.state.blocking_write().plots.merge(plot.clone());
        self.daemon.publish(RuntimeEvent::Plot(plot));
    }

    fn on_confirmation(&mut self, request: ConfirmationRequest) {
        let prompt = request.prompt();
        self.daemon
            .state
            .blocking_write()
            .pending
            .insert(request.id, request);
        self.daemon.publish(RuntimeEvent::Confirmation(prompt));
    }

    fn on_code_update(&mut self, source: &str) {
        if let RunOrigin::Script(path) = &self.origin {
            match self.daemon.project.write_script(path, source) {
                Ok(()) => info!("Wrote self-edit back to {}", path),
                Err(e) => warn!("Self-edit write-back failed: {}", e),
            }
        }
        self.daemon.publish(RuntimeEvent::CodeUpdate {
            source: source.to_string(),
        });
    }

    fn on_checkpoint(&mut self, checkpoint: ModelCheckpoint) {
        let file = self.daemon.paths.checkpoint_file(&checkpoint.path);
        match std::fs::write(&file, &checkpoint.image) {
            Ok(()) => info!("Checkpoint {} saved to {:?}", checkpoint.model, file),
            Err(e) => error!("Failed to write checkpoint {:?}: {}", file, e),
        }
        self.daemon.publish(RuntimeEvent::from(&checkpoint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goober::runtime::{LogKind, RunOutcome};

    fn daemon(tag: &str) -> (Arc<Daemon>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("gooberd-daemon-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let paths = AppPaths::at(dir.join("data")).unwrap();
        let project = Project::open_or_init(dir.join("project")).unwrap();
        let config = DaemonConfig {
            seed: Some(1),
            loop_yield_ms: 0,
            ..DaemonConfig::default()
        };
        (Arc::new(Daemon::new(&config, paths, project)), dir)
    }

    async fn next_event(rx: &mut broadcast::Receiver<RuntimeEvent>) -> RuntimeEvent {
        tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn run_streams_logs_and_finishes() {
        let (d, dir) = daemon("logs");
        let mut rx = d.subscribe();
        let job = d
            .start_run("GB.Utils.log('hi')".to_string(), RunOrigin::Code)
            .await
            .unwrap();
        let report = job.await.unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);

        let mut messages = Vec::new();
        loop {
            match next_event(&mut rx).await {
                RuntimeEvent::Log(entry) => messages.push((entry.kind, entry.message)),
                RuntimeEvent::RunFinished { outcome, .. } => {
                    assert_eq!(outcome, RunOutcome::Completed);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(messages[0], (LogKind::Info, "hi".to_string()));
        assert_eq!(messages.last().unwrap().1, "Execution Finished.");
        assert_eq!(d.status().await.source, None);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn confirmation_via_daemon() {
        let (d, dir) = daemon("confirm");
        let mut rx = d.subscribe();
        let code = "const ok = GB.Control.requestConfirmation('deploy?'); GB.Utils.log('answer ' + ok);";
        let job = d.start_run(code.to_string(), RunOrigin::Code).await.unwrap();

        let id = loop {
            if let RuntimeEvent::Confirmation(prompt) = next_event(&mut rx).await {
                assert_eq!(prompt.message, "deploy?");
                break prompt.id;
            }
        };
        assert_eq!(d.status().await.pending_confirmations.len(), 1);
        assert!(matches!(
            d.confirm(id + 1, true).await,
            Err(DaemonError::NoPendingConfirmation(_))
        ));
        d.confirm(id, true).await.unwrap();
        job.await.unwrap().unwrap();

        let mut saw_answer = false;
        loop {
            match next_event(&mut rx).await {
                RuntimeEvent::Log(entry) if entry.message == "answer true" => saw_answer = true,
                RuntimeEvent::RunFinished { .. } => break,
                _ => {}
            }
        }
        assert!(saw_answer);
        // Answering again after the run is gone.
        assert!(d.confirm(id, true).await.is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn second_run_is_rejected_and_stop_ends_the_first() {
        let (d, dir) = daemon("busy");
        let job = d
            .start_run("while (true) {}".to_string(), RunOrigin::Code)
            .await
            .unwrap();
        let second = d.start_run("1".to_string(), RunOrigin::Code).await;
        assert!(matches!(second, Err(DaemonError::Engine(_))));

        // A stop before the worker starts the engine would be cleared with the signals.
        while d.status().await.state != EngineState::Running {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        d.stop();
        let report = job.await.unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert!(d.start_run("1".to_string(), RunOrigin::Code).await.is_ok());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn self_edits_are_written_back_to_the_script() {
        let (d, dir) = daemon("edit");
        let path = "edit.gb";
        let source = "var rate = 0.5;\nGB.Code.selfEdit('0.5', '0.7');";
        d.project().write_script(path, source).unwrap();
        let job = d
            .start_run(source.to_string(), RunOrigin::Script(path.to_string()))
            .await
            .unwrap();
        job.await.unwrap().unwrap();
        let on_disk = d.project().read_script(path).unwrap();
        assert!(on_disk.starts_with("var rate = 0.7;"));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn plots_are_merged_for_the_current_run() {
        let (d, dir) = daemon("plots");
        let code = "for (let i = 0; i < 3; i++) { GB.Visual.plot({ title: 'Loss', data: [{ step: i }] }); }";
        let job = d.start_run(code.to_string(), RunOrigin::Code).await.unwrap();
        job.await.unwrap().unwrap();
        let plots = d.plots().await;
        assert_eq!(plots.len(), 1);
        assert_eq!(plots[0].data.len(), 3);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
