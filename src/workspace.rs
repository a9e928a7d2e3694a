// ========================================================================================
//
//                          SCOPED WORKING DIRECTORY
//
// ========================================================================================
//
// Every stage of the merge engine writes its intermediates into a `Workspace`
// value it is handed, never into ambient global state. A workspace is either a
// caller-named directory that is retained after the run (for audit) or an
// anonymous temporary directory that is removed when the value is dropped, so
// parallel runs and tests never collide.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    // Some(_) keeps the TempDir alive; dropping it deletes the tree.
    _ephemeral: Option<TempDir>,
}

impl Workspace {
    /// Opens (creating if necessary) a retained workspace at a caller-chosen
    /// directory. Intermediates survive the run.
    pub fn at(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            root: dir.to_path_buf(),
            _ephemeral: None,
        })
    }

    /// Creates a workspace in a fresh temporary directory, deleted on drop.
    pub fn ephemeral() -> io::Result<Self> {
        let temp = TempDir::new()?;
        Ok(Self {
            root: temp.path().to_path_buf(),
            _ephemeral: Some(temp),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A uniquely-named path inside the workspace for one stage artifact.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
