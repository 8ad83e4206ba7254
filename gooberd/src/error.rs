use std::path::PathBuf;

use goober::error::{ConfirmationError, EngineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("{action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid project path {0:?}")]
    InvalidPath(String),

    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("project has no .gb scripts")]
    NoScripts,

    #[error("no pending confirmation with id {0}")]
    NoPendingConfirmation(u64),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
}

impl DaemonError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| DaemonError::Io {
            action,
            path,
            source,
        }
    }
}
