//! Scoped build workspaces.

use kiln_core::ResourceId;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory owned by one build.
///
/// Removed by [`Workspace::cleanup`] or, failing that, when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create an empty workspace under `root`, or the system temp dir.
    pub fn create(root: Option<&Path>, build_id: &ResourceId) -> io::Result<Self> {
        let prefix = format!("kiln-{}-", build_id.short());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory. Safe to call more than once.
    pub fn cleanup(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_under_root() {
        let root = tempfile::tempdir().unwrap();
        let id = ResourceId::new();
        let ws = Workspace::create(Some(root.path()), &id).unwrap();

        assert!(ws.path().is_dir());
        assert!(ws.path().starts_with(root.path()));
        let name = ws.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("kiln-{}-", id.short())));
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let ws = Workspace::create(Some(&nested), &ResourceId::new()).unwrap();
        assert!(ws.path().starts_with(&nested));
    }

    #[test]
    fn test_cleanup_twice_is_ok() {
        let mut ws = Workspace::create(None, &ResourceId::new()).unwrap();
        std::fs::write(ws.path().join("file.txt"), "data").unwrap();
        let path = ws.path().to_path_buf();

        ws.cleanup().unwrap();
        assert!(!path.exists());
        ws.cleanup().unwrap();
        drop(ws);
    }

    #[test]
    fn test_drop_removes_directory() {
        let ws = Workspace::create(None, &ResourceId::new()).unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }
}
