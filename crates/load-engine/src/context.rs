//! Run context: the scoped directory one invocation writes its artifacts to.
//!
//! Every component that persists something receives a `&RunContext`; nothing
//! in the engine constructs a shared results location on its own.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Scoped artifact directory plus a per-context sequence for unique names.
#[derive(Debug)]
pub struct RunContext {
    artifact_dir: PathBuf,
    sequence: AtomicU32,
}

impl RunContext {
    /// Create the context, creating the directory if needed.
    pub fn create(artifact_dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let artifact_dir = artifact_dir.into();
        fs::create_dir_all(&artifact_dir)?;
        debug!(dir = %artifact_dir.display(), "Run context ready");
        Ok(Self {
            artifact_dir,
            sequence: AtomicU32::new(0),
        })
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Next value of the per-context artifact counter, starting at 1.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write `contents` to `name` inside the artifact directory.
    ///
    /// `name` must be a bare file name; anything that would escape the
    /// directory is rejected.
    pub fn write_artifact(&self, name: &str, contents: &[u8]) -> EngineResult<PathBuf> {
        let path = self.artifact_path(name)?;
        fs::write(&path, contents)?;
        debug!(path = %path.display(), bytes = contents.len(), "Wrote artifact");
        Ok(path)
    }

    /// Resolve a bare file name inside the artifact directory.
    pub fn artifact_path(&self, name: &str) -> EngineResult<PathBuf> {
        let candidate = Path::new(name);
        let is_bare = candidate.file_name().map(|f| f == candidate.as_os_str()) == Some(true);
        if !is_bare || name == "." || name == ".." {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("artifact name must be a bare file name: {}", name),
            )));
        }
        Ok(self.artifact_dir.join(name))
    }

    /// Most recently modified artifact whose name matches `prefix*suffix`.
    pub fn latest_artifact(&self, prefix: &str, suffix: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.artifact_dir).ok()?;

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if !(name.starts_with(prefix) && name.ends_with(suffix)) {
                    return None;
                }
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, name, entry.path()))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, _, path)| path)
    }
}
