//! Daemon settings: `<data_dir>/config.json`, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use goober::runtime::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DaemonError;
use crate::paths::AppPaths;

fn default_addr() -> String {
    "127.0.0.1:9877".to_string()
}

fn default_loop_yield_ms() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Directory served to scripts; defaults to `<data_dir>/project`.
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_loop_yield_ms")]
    pub loop_yield_ms: u64,
    /// Events buffered per subscriber before a slow one starts missing them.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            project_dir: None,
            seed: None,
            loop_yield_ms: default_loop_yield_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    /// Read the config file (a missing file means defaults) and apply
    /// `GOOBER_ADDR`, `GOOBER_PROJECT` and `GOOBER_SEED`.
    pub fn load(paths: &AppPaths) -> Result<Self, DaemonError> {
        let mut config = Self::from_file(&paths.config_file())?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(DaemonError::io("read", path))?;
        let config = serde_json::from_str(&text).map_err(|source| DaemonError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), DaemonError> {
        if let Some(addr) = lookup("GOOBER_ADDR") {
            self.addr = addr;
        }
        if let Some(dir) = lookup("GOOBER_PROJECT") {
            self.project_dir = Some(PathBuf::from(dir));
        }
        if let Some(seed) = lookup("GOOBER_SEED") {
            let parsed = seed.trim().parse().map_err(|_| DaemonError::Env {
                var: "GOOBER_SEED",
                value: seed.clone(),
            })?;
            self.seed = Some(parsed);
        }
        Ok(())
    }

    pub fn project_dir(&self, paths: &AppPaths) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| paths.default_project_dir())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::default().with_loop_yield(Duration::from_millis(self.loop_yield_ms));
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: DaemonConfig = serde_json::from_str(r#"{"seed": 7}"#).unwrap();
        assert_eq!(config.addr, "127.0.0.1:9877");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.loop_yield_ms, 30);
        assert!(config.project_dir.is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = DaemonConfig {
            addr: "0.0.0.0:1".to_string(),
            ..DaemonConfig::default()
        };
        config
            .apply_env(|var| match var {
                "GOOBER_ADDR" => Some("127.0.0.1:5000".to_string()),
                "GOOBER_PROJECT" => Some("/tmp/proj".to_string()),
                "GOOBER_SEED" => Some(" 42 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.addr, "127.0.0.1:5000");
        assert_eq!(config.project_dir, Some(PathBuf::from("/tmp/proj")));
        assert_eq!(config.engine_config().seed, Some(42));
    }

    #[test]
    fn bad_seed_is_rejected() {
        let mut config = DaemonConfig::default();
        let err = config
            .apply_env(|var| (var == "GOOBER_SEED").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(matches!(err, DaemonError::Env { var: "GOOBER_SEED", .. }));
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = DaemonConfig::from_file(Path::new("/nonexistent/gooberd/config.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn engine_config_uses_loop_yield() {
        let config = DaemonConfig {
            loop_yield_ms: 0,
            ..DaemonConfig::default()
        };
        assert_eq!(config.engine_config().loop_yield, Duration::ZERO);
        assert_eq!(config.engine_config().seed, None);
    }
}
