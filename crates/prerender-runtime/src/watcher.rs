//! Stat-based change detection for a script's backing file.
//!
//! No filesystem notifications: the file's size and modification time are
//! compared against the last recorded values whenever a render is about to
//! be dispatched.

use prerender_common::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Size and modification time of a file at one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct SourceWatcher {
    path: PathBuf,
    recorded: FileStamp,
}

impl SourceWatcher {
    pub(crate) fn new(path: impl Into<PathBuf>, recorded: FileStamp) -> Self {
        Self {
            path: path.into(),
            recorded,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Stats the file; returns the new stamp if it differs from the recorded one.
    pub(crate) fn changed(&self) -> Result<Option<FileStamp>> {
        let current = FileStamp::read(&self.path)?;
        Ok((current != self.recorded).then_some(current))
    }

    pub(crate) fn load(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    pub(crate) fn record(&mut self, stamp: FileStamp) {
        self.recorded = stamp;
    }
}
