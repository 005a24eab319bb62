//! Job queue client.
//!
//! The queue service is an HTTP endpoint that hands out at most one job per
//! request. Callers treat every error as "no job" and back off.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::job::{Job, JobId};

/// Source of job descriptors.
pub trait JobQueue {
    /// Claim the next job. `Ok(None)` means the queue had no work.
    fn poll(&mut self) -> Result<Option<Job>>;
}

impl<T: JobQueue + ?Sized> JobQueue for Box<T> {
    fn poll(&mut self) -> Result<Option<Job>> {
        (**self).poll()
    }
}

/// Polls the queue webhook with `{"worker": <id>}`.
pub struct HttpJobQueue {
    agent: ureq::Agent,
    url: String,
    worker_id: String,
}

impl HttpJobQueue {
    pub fn new(url: impl Into<String>, worker_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
            worker_id: worker_id.into(),
        }
    }
}

impl JobQueue for HttpJobQueue {
    fn poll(&mut self) -> Result<Option<Job>> {
        log::debug!("polling {} for job", self.url);
        let response = self
            .agent
            .post(&self.url)
            .send_json(serde_json::json!({ "worker": self.worker_id }))
            .with_context(|| format!("poll job queue at {}", self.url))?;
        let body = response
            .into_string()
            .context("read job queue response")?;
        log::debug!("job queue response: {}", body);
        parse_job_response(&body)
    }
}

/// Parse a queue response body.
///
/// An empty body, `null`, or an object without a usable `jobId` (absent,
/// null, false, empty, or 0) means no work. A `jobId` without a `fileName`
/// is malformed.
pub fn parse_job_response(body: &str) -> Result<Option<Job>> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| anyhow!("malformed job response: {}", e))?;
    let object = match value {
        Value::Null => return Ok(None),
        Value::Object(object) => object,
        other => return Err(anyhow!("unexpected job response type: {}", json_kind(&other))),
    };

    let job_id = match object.get("jobId") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(None),
        Some(Value::String(id)) if id.trim().is_empty() => return Ok(None),
        Some(Value::Number(id)) if id.as_f64() == Some(0.0) => return Ok(None),
        Some(Value::String(id)) => JobId::new(id.clone())?,
        Some(Value::Number(id)) => JobId::new(id.to_string())?,
        Some(other) => return Err(anyhow!("jobId has unsupported type {}", json_kind(other))),
    };

    let file_name = object
        .get("fileName")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("job {} has no fileName", job_id))?;

    Job::new(job_id, file_name).map(Some)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
