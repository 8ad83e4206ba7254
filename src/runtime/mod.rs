//! Script execution: lifecycle, the `GB` host and the event stream.

mod api;
pub mod context;
pub mod engine;
pub mod events;
pub mod fs;
pub mod plot;

pub use context::{CodeBuffer, RunContext};
pub use engine::{Engine, EngineConfig, EngineHandle, EngineState, RunReport};
pub use events::{
    ConfirmationPrompt, ConfirmationRequest, ConfirmationResponder, EventSink, LogEntry, LogKind,
    ModelCheckpoint, PlotEvent, PlotKind, PlotSeries, RunOutcome, RuntimeEvent, Signal,
};
pub use fs::{load_dir, FileKind, FileNode, FileSource};
pub use plot::{PlotBoard, PLOT_HISTORY_CAP};
