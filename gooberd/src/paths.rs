//! Application directories.
//!
//! - Linux: ~/.local/share/gooberd/
//! - Windows: %APPDATA%\gooberd\
//! - MacOS: ~/Library/Application Support/gooberd/

use std::path::{Path, PathBuf};

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let base = dirs::data_dir().ok_or(DaemonError::NoDataDir)?;
        Self::at(base.join("gooberd"))
    }

    /// Use `dir` as the data directory, creating it and `checkpoints/`.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let paths = Self {
            data_dir: dir.into(),
        };
        let checkpoints = paths.checkpoints_dir();
        std::fs::create_dir_all(&checkpoints)
            .map_err(DaemonError::io("create directory", &checkpoints))?;
        Ok(paths)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn default_project_dir(&self) -> PathBuf {
        self.data_dir.join("project")
    }

    /// Where a script-chosen checkpoint name lands. Only the final path
    /// component is kept so a name cannot escape `checkpoints/`.
    pub fn checkpoint_file(&self, name: &str) -> PathBuf {
        let file = Path::new(name)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| "model.ckpt".to_string());
        self.checkpoints_dir().join(file)
    }
}
