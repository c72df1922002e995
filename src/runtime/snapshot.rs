//! Workspace file-set snapshots for created/modified detection

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Regular files under a workspace, keyed by `/`-separated relative path
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    files: BTreeMap<String, FileStamp>,
}

impl WorkspaceSnapshot {
    /// Walk `root`, skipping symlinks and any top-level entry named in `exclude`.
    pub fn capture(root: &Path, exclude: &[&str]) -> io::Result<Self> {
        let mut snapshot = WorkspaceSnapshot::default();
        snapshot.walk(root, "", exclude)?;
        Ok(snapshot)
    }

    fn walk(&mut self, dir: &Path, prefix: &str, exclude: &[&str]) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefix.is_empty() && exclude.contains(&name.as_str()) {
                continue;
            }
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &rel, exclude)?;
            } else if file_type.is_file() {
                let meta = entry.metadata()?;
                self.files.insert(
                    rel,
                    FileStamp {
                        len: meta.len(),
                        modified: meta.modified().ok(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths new in `after`, then paths whose size or mtime changed.
    pub fn diff(&self, after: &WorkspaceSnapshot) -> (Vec<String>, Vec<String>) {
        let mut created = Vec::new();
        let mut modified = Vec::new();
        for (path, stamp) in &after.files {
            match self.files.get(path) {
                None => created.push(path.clone()),
                Some(before) if before != stamp => modified.push(path.clone()),
                Some(_) => {}
            }
        }
        (created, modified)
    }
}
