//! The on-disk project directory served to scripts through `GB.FileSystem`.

use std::path::{Component, Path, PathBuf};

use goober::runtime::{fs, load_dir, FileNode, FileSource};
use tracing::{info, warn};

use crate::error::DaemonError;

const DEFAULT_SCRIPT: &str = r##"// GooberLang starter script
GB.Utils.log("Initializing HiveMind...");
var hive = GB.hive.HiveMind("Alpha", { capacity: 5000, plasticity: 0.9 });

for (var step = 0; step < 20; step++) {
    var signal = GB.Control.getSignal();
    if (signal == "STOP") break;
    var m = GB.hive.trainTask(hive, { difficulty: 0.5 });
    GB.Visual.plot({
        title: "Training",
        xAxisKey: "step",
        series: [{ key: "loss", color: "#f87171" }, { key: "accuracy", color: "#34d399" }],
        data: [{ step: step, loss: m.loss, accuracy: m.accuracy }]
    });
}
GB.Utils.log("Done. Final satisfaction: " + hive.satisfaction.toFixed(3));
"##;

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed; a brand new project gets `main.gb`.
    pub fn open_or_init(root: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let project = Self::new(root);
        if !project.root.exists() {
            std::fs::create_dir_all(&project.root)
                .map_err(DaemonError::io("create directory", &project.root))?;
            let main = project.root.join("main.gb");
            std::fs::write(&main, DEFAULT_SCRIPT).map_err(DaemonError::io("write", &main))?;
            info!("Initialized project at {:?}", project.root);
        }
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a script-facing path onto the project directory. Absolute paths
    /// are read relative to the project root; `..` is refused.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, DaemonError> {
        let mut out = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(DaemonError::InvalidPath(path.to_string()))
                }
            }
        }
        if out == self.root {
            return Err(DaemonError::InvalidPath(path.to_string()));
        }
        Ok(out)
    }

    pub fn read_script(&self, path: &str) -> Result<String, DaemonError> {
        let file = self.resolve(path)?;
        if !file.is_file() {
            return Err(DaemonError::ScriptNotFound(path.to_string()));
        }
        std::fs::read_to_string(&file).map_err(DaemonError::io("read", &file))
    }

    /// Persist a self-edited script over the file it was loaded from.
    pub fn write_script(&self, path: &str, source: &str) -> Result<(), DaemonError> {
        let file = self.resolve(path)?;
        std::fs::write(&file, source).map_err(DaemonError::io("write", &file))
    }

    /// Every `.gb` file, in path order, each prefixed with a file marker
    /// comment and separated by a blank line.
    pub fn concat_scripts(&self) -> Result<String, DaemonError> {
        let nodes = load_dir(&self.root).map_err(DaemonError::io("read directory", &self.root))?;
        let mut scripts: Vec<(String, &FileNode)> = nodes
            .iter()
            .filter(|n| !n.is_folder() && n.name.ends_with(".gb"))
            .map(|n| (fs::path_of(&nodes, n), n))
            .collect();
        if scripts.is_empty() {
            return Err(DaemonError::NoScripts);
        }
        scripts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(scripts
            .iter()
            .map(|(_, n)| format!("// --- File: {} ---\n{}", n.name, n.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

impl FileSource for Project {
    fn snapshot(&self) -> Vec<FileNode> {
        load_dir(&self.root).unwrap_or_else(|e| {
            warn!("Could not read project directory {:?}: {}", self.root, e);
            Vec::new()
        })
    }
}
