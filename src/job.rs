//! Job and plate reading records.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;

use crate::transfer::remote_join;

/// Opaque job identifier assigned by the queue service.
///
/// Also used as a local directory name and a remote path segment, so it must
/// be a single non-empty path component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_path_component(&value, "jobId")?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One claimed unit of work: a single archive to scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub job_id: JobId,
    pub file_name: String,
}

impl Job {
    pub fn new(job_id: JobId, file_name: impl Into<String>) -> Result<Self> {
        let file_name = file_name.into();
        validate_path_component(&file_name, "fileName")?;
        Ok(Self { job_id, file_name })
    }

    /// Remote location of the pending archive under the processing area.
    pub fn retrieval_location(&self, remote_processing: &str) -> String {
        remote_join(remote_processing, &self.file_name)
    }

    /// Remote directory the archive is moved into once processed.
    pub fn done_location(&self, remote_done: &str) -> String {
        remote_join(remote_done, self.job_id.as_str())
    }
}

/// A normalized, confidence-accepted plate attributed to a job.
///
/// Serializes to the collector payload `{"jobId": ..., "plate": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateReading {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    #[serde(rename = "plate")]
    pub plate_text: String,
    #[serde(skip)]
    pub confidence: f32,
}

fn validate_path_component(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", field));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(anyhow!("{} '{}' is not a single path component", field, value));
    }
    if value.chars().any(char::is_control) {
        return Err(anyhow!("{} contains control characters", field));
    }
    Ok(())
}
