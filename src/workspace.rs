//! Per-job local working directories.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::job::JobId;

/// Working directory for one job iteration, keyed by job id.
///
/// Creation is idempotent. The directory is removed on drop unless `keep` is
/// set, so abandoned jobs do not accumulate on disk.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn create(root: &Path, job_id: &JobId, keep: bool) -> Result<Self> {
        let path = root.join(job_id.as_str());
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create working directory {}", path.display()))?;
        Ok(Self { path, keep })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove working directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
