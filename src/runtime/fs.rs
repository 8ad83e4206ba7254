//! Read-only view of the project file tree.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub depth: i32,
}

impl FileNode {
    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }
}

/// Supplies the current file tree on demand.
pub trait FileSource {
    fn snapshot(&self) -> Vec<FileNode>;
}

impl<F> FileSource for F
where
    F: Fn() -> Vec<FileNode>,
{
    fn snapshot(&self) -> Vec<FileNode> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Root,
    Node(&'a FileNode),
}

impl Resolved<'_> {
    pub fn is_directory(&self) -> bool {
        match self {
            Resolved::Root => true,
            Resolved::Node(n) => n.is_folder(),
        }
    }
}

/// Walk a slash-separated path from the root. Empty and `.` segments are
/// ignored; every segment but the last must name a folder.
pub fn resolve<'a>(nodes: &'a [FileNode], path: &str) -> Option<Resolved<'a>> {
    if matches!(path, "" | "/" | ".") {
        return Some(Resolved::Root);
    }
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.is_empty() {
        return Some(Resolved::Root);
    }
    let mut parent: Option<&str> = None;
    let mut found = None;
    for (i, part) in parts.iter().enumerate() {
        let node = nodes
            .iter()
            .find(|n| n.parent_id.as_deref() == parent && n.name == *part)?;
        if i + 1 < parts.len() {
            if !node.is_folder() {
                return None;
            }
            parent = Some(node.id.as_str());
        }
        found = Some(node);
    }
    found.map(Resolved::Node)
}

pub fn list(nodes: &[FileNode], path: &str) -> Vec<String> {
    let parent = match resolve(nodes, path) {
        Some(Resolved::Root) => None,
        Some(Resolved::Node(n)) if n.is_folder() => Some(n.id.as_str()),
        _ => return Vec::new(),
    };
    nodes
        .iter()
        .filter(|n| n.parent_id.as_deref() == parent)
        .map(|n| n.name.clone())
        .collect()
}

pub fn read(nodes: &[FileNode], path: &str) -> Option<String> {
    match resolve(nodes, path)? {
        Resolved::Node(n) if !n.is_folder() => Some(n.content.clone()),
        _ => None,
    }
}

pub fn exists(nodes: &[FileNode], path: &str) -> bool {
    resolve(nodes, path).is_some()
}

pub fn is_directory(nodes: &[FileNode], path: &str) -> bool {
    resolve(nodes, path).is_some_and(|r| r.is_directory())
}

/// Path of `node` from the root, e.g. `src/main.gb`.
pub fn path_of(nodes: &[FileNode], node: &FileNode) -> String {
    let mut parts = vec![node.name.as_str()];
    let mut parent = node.parent_id.as_deref();
    // Bounded by the node count so a cyclic snapshot cannot hang.
    for _ in 0..nodes.len() {
        let Some(id) = parent else { break };
        match nodes.iter().find(|n| n.id == id) {
            Some(p) => {
                parts.push(p.name.as_str());
                parent = p.parent_id.as_deref();
            }
            None => break,
        }
    }
    parts.reverse();
    parts.join("/")
}

/// Snapshot a directory on disk. Ids are root-relative paths; hidden entries
/// are skipped and siblings are sorted by name.
pub fn load_dir(root: &Path) -> io::Result<Vec<FileNode>> {
    let mut nodes = Vec::new();
    walk(root, None, 0, &mut nodes)?;
    Ok(nodes)
}

fn walk(dir: &Path, parent: Option<&str>, depth: i32, out: &mut Vec<FileNode>) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let id = match parent {
            Some(p) => format!("{p}/{name}"),
            None => name.clone(),
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            out.push(FileNode {
                id: id.clone(),
                name,
                kind: FileKind::Folder,
                parent_id: parent.map(str::to_string),
                content: String::new(),
                depth,
            });
            walk(&entry.path(), Some(id.as_str()), depth + 1, out)?;
        } else if file_type.is_file() {
            // Binary files show up with empty content.
            let content = std::fs::read_to_string(entry.path()).unwrap_or_default();
            out.push(FileNode {
                id,
                name,
                kind: FileKind::File,
                parent_id: parent.map(str::to_string),
                content,
                depth,
            });
        }
    }
    Ok(())
}
