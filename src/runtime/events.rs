//! Everything a run reports to the outside world.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConfirmationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
    Success,
    System,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Error => "error",
            LogKind::Success => "success",
            LogKind::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    /// Wall-clock time of emission, `HH:MM:SS` (UTC).
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: clock_time(SystemTime::now()),
            kind,
            message: message.into(),
        }
    }
}

/// Format the time of day of `t` as `HH:MM:SS` in UTC.
///
/// Log timestamps are UTC, not the host's local time.
pub fn clock_time(t: SystemTime) -> String {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, (day / 60) % 60, day % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    #[default]
    Line,
    Bar,
    Area,
    Scatter,
}

impl PlotKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "line" => Some(PlotKind::Line),
            "bar" => Some(PlotKind::Bar),
            "area" => Some(PlotKind::Area),
            "scatter" => Some(PlotKind::Scatter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    pub key: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotEvent {
    pub id: String,
    pub title: String,
    pub x_axis_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis_label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: PlotKind,
    #[serde(default)]
    pub series: Vec<PlotSeries>,
    /// One JSON object per sample, keyed by `x_axis_key` and the series keys.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// Control tokens a client can post to a running script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Stop,
    BoostLr,
    TriggerAnomaly,
    SparIntense,
    SaveCheckpoint,
    Pause,
    Resume,
}

impl Signal {
    pub const ALL: [Signal; 7] = [
        Signal::Stop,
        Signal::BoostLr,
        Signal::TriggerAnomaly,
        Signal::SparIntense,
        Signal::SaveCheckpoint,
        Signal::Pause,
        Signal::Resume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Stop => "STOP",
            Signal::BoostLr => "BOOST_LR",
            Signal::TriggerAnomaly => "TRIGGER_ANOMALY",
            Signal::SparIntense => "SPAR_INTENSE",
            Signal::SaveCheckpoint => "SAVE_CHECKPOINT",
            Signal::Pause => "PAUSE",
            Signal::Resume => "RESUME",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl fmt::Display for UnknownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal '{}'", self.0)
    }
}

impl std::error::Error for UnknownSignal {}

impl FromStr for Signal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signal::ALL
            .iter()
            .copied()
            .find(|sig| sig.as_str() == s)
            .ok_or_else(|| UnknownSignal(s.to_string()))
    }
}

/// Answers one confirmation prompt; cloneable so a UI can hand it around.
///
/// The prompt is live only while the run is blocked on it. Once it has been
/// answered, or the run stopped or finished, further answers are stale.
#[derive(Debug, Clone)]
pub struct ConfirmationResponder {
    id: u64,
    tx: SyncSender<bool>,
}

impl ConfirmationResponder {
    pub(crate) fn new(id: u64, tx: SyncSender<bool>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn answer(&self, approved: bool) -> Result<(), ConfirmationError> {
        match self.tx.try_send(approved) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(id = self.id, "stale confirmation answer rejected");
                Err(ConfirmationError::Stale { id: self.id })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub run_id: u64,
    pub id: u64,
    pub message: String,
    pub responder: ConfirmationResponder,
}

impl ConfirmationRequest {
    pub fn prompt(&self) -> ConfirmationPrompt {
        ConfirmationPrompt {
            run_id: self.run_id,
            id: self.id,
            message: self.message.clone(),
        }
    }
}

/// The serializable part of a [`ConfirmationRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPrompt {
    pub run_id: u64,
    pub id: u64,
    pub message: String,
}

/// A network image produced by `GB.saveModel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub run_id: u64,
    pub model: String,
    pub path: String,
    #[serde(skip)]
    pub image: Vec<u8>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Stopped,
    Errored { message: String },
    CompileFailed { message: String },
}

/// Event stream entry as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Log(LogEntry),
    Plot(PlotEvent),
    Confirmation(ConfirmationPrompt),
    CodeUpdate { source: String },
    Checkpoint { run_id: u64, model: String, path: String, bytes: usize },
    RunFinished { run_id: u64, outcome: RunOutcome, elapsed_ms: u64 },
}

impl From<&ModelCheckpoint> for RuntimeEvent {
    fn from(c: &ModelCheckpoint) -> Self {
        RuntimeEvent::Checkpoint {
            run_id: c.run_id,
            model: c.model.clone(),
            path: c.path.clone(),
            bytes: c.image.len(),
        }
    }
}

/// Receives everything a run emits, in emission order.
pub trait EventSink {
    fn on_log(&mut self, entry: LogEntry);
    fn on_plot(&mut self, plot: PlotEvent);
    fn on_confirmation(&mut self, request: ConfirmationRequest);
    fn on_code_update(&mut self, _source: &str) {}
    fn on_checkpoint(&mut self, _checkpoint: ModelCheckpoint) {}
}
