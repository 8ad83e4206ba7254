pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/tensor.rs"]
pub mod tensor;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/hive.rs"]
pub mod hive;

#[path = "core/graph.rs"]
pub mod graph;

#[path = "core/tasks.rs"]
pub mod tasks;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/gpu.rs"]
pub mod gpu;

pub mod runtime;
pub mod script;

pub mod prelude {
    pub use crate::error::{CompileError, ConfirmationError, EngineError, TensorError};
    pub use crate::hive::{Network, NetworkConfig};
    pub use crate::runtime::{
        Engine, EngineConfig, EngineHandle, EventSink, LogEntry, LogKind, RunOutcome, Signal,
    };
}
