use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::{
    PipelineSettings, DEFAULT_DETECTION_THRESHOLD, DEFAULT_FRAME_STRIDE,
    DEFAULT_RECOGNITION_THRESHOLD,
};
use crate::runner::RunnerSettings;

const DEFAULT_QUEUE_URL: &str = "https://n8n.honeyhomes.in/webhook/vtm/get-job";
const DEFAULT_SINK_URL: &str = "https://n8n.honeyhomes.in/webhook/vtm/plate-captured";
const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 20;
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_BACKOFF_SECS: u64 = 10;
const DEFAULT_REMOTE_PROCESSING: &str = "gdrive:VTM Extractor/Processing Videos";
const DEFAULT_REMOTE_DONE: &str = "gdrive:VTM Extractor/Processed";
const DEFAULT_RCLONE_BINARY: &str = "rclone";
const DEFAULT_RCLONE_FLAGS: &[&str] = &["--drive-shared-with-me"];
const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";
const DEFAULT_DETECTOR_MODEL: &str = "/root/best.onnx";
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_RECOGNIZER_MODEL: &str = "/root/plate_rec.onnx";
const DEFAULT_RECOGNIZER_DICT: &str = "/root/plate_dict.txt";
const FALLBACK_WORKER_ID: &str = "plate-worker";

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    worker_id: Option<String>,
    workspace_root: Option<PathBuf>,
    keep_workdir: Option<bool>,
    poll_backoff_secs: Option<u64>,
    queue: Option<EndpointConfigFile>,
    sink: Option<EndpointConfigFile>,
    remote: Option<RemoteConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    models: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RemoteConfigFile {
    processing: Option<String>,
    done: Option<String>,
    rclone_binary: Option<PathBuf>,
    rclone_flags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    detection_threshold: Option<f32>,
    recognition_threshold: Option<f32>,
    frame_stride: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    detector: Option<PathBuf>,
    detector_input_width: Option<u32>,
    detector_input_height: Option<u32>,
    recognizer: Option<PathBuf>,
    recognizer_dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub workspace_root: PathBuf,
    pub keep_workdir: bool,
    pub poll_backoff: Duration,
    pub queue: EndpointSettings,
    pub sink: EndpointSettings,
    pub remote: RemoteSettings,
    pub pipeline: PipelineSettings,
    pub models: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub processing: String,
    pub done: String,
    pub rclone_binary: PathBuf,
    pub rclone_flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub detector: PathBuf,
    pub detector_input_width: u32,
    pub detector_input_height: u32,
    pub recognizer: PathBuf,
    pub recognizer_dictionary: PathBuf,
}

impl WorkerConfig {
    /// Load from the file named by `PLATE_WORKER_CONFIG` (if any), then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLATE_WORKER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file (if any), then the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            workspace_root: self.workspace_root.clone(),
            remote_processing: self.remote.processing.clone(),
            remote_done: self.remote.done.clone(),
            poll_backoff: self.poll_backoff,
            keep_workdir: self.keep_workdir,
            pipeline: self.pipeline,
        }
    }

    fn from_file(file: WorkerConfigFile) -> Self {
        let endpoint = |cfg: Option<EndpointConfigFile>, url: &str, timeout: u64| {
            let cfg = cfg.unwrap_or_default();
            EndpointSettings {
                url: cfg.url.unwrap_or_else(|| url.to_string()),
                timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(timeout)),
            }
        };
        let remote = file.remote.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let models = file.models.unwrap_or_default();

        Self {
            worker_id: file.worker_id.unwrap_or_else(host_worker_id),
            workspace_root: file
                .workspace_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_ROOT)),
            keep_workdir: file.keep_workdir.unwrap_or(false),
            poll_backoff: Duration::from_secs(
                file.poll_backoff_secs.unwrap_or(DEFAULT_POLL_BACKOFF_SECS),
            ),
            queue: endpoint(file.queue, DEFAULT_QUEUE_URL, DEFAULT_QUEUE_TIMEOUT_SECS),
            sink: endpoint(file.sink, DEFAULT_SINK_URL, DEFAULT_SINK_TIMEOUT_SECS),
            remote: RemoteSettings {
                processing: remote
                    .processing
                    .unwrap_or_else(|| DEFAULT_REMOTE_PROCESSING.to_string()),
                done: remote
                    .done
                    .unwrap_or_else(|| DEFAULT_REMOTE_DONE.to_string()),
                rclone_binary: remote
                    .rclone_binary
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RCLONE_BINARY)),
                rclone_flags: remote.rclone_flags.unwrap_or_else(|| {
                    DEFAULT_RCLONE_FLAGS.iter().map(|f| f.to_string()).collect()
                }),
            },
            pipeline: PipelineSettings {
                detection_threshold: pipeline
                    .detection_threshold
                    .unwrap_or(DEFAULT_DETECTION_THRESHOLD),
                recognition_threshold: pipeline
                    .recognition_threshold
                    .unwrap_or(DEFAULT_RECOGNITION_THRESHOLD),
                frame_stride: pipeline.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
            },
            models: ModelSettings {
                detector: models
                    .detector
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTOR_MODEL)),
                detector_input_width: models
                    .detector_input_width
                    .unwrap_or(DEFAULT_DETECTOR_INPUT),
                detector_input_height: models
                    .detector_input_height
                    .unwrap_or(DEFAULT_DETECTOR_INPUT),
                recognizer: models
                    .recognizer
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RECOGNIZER_MODEL)),
                recognizer_dictionary: models
                    .recognizer_dictionary
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RECOGNIZER_DICT)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(id) = env_non_empty("PLATE_WORKER_ID") {
            self.worker_id = id;
        }
        if let Some(url) = env_non_empty("PLATE_QUEUE_URL") {
            self.queue.url = url;
        }
        if let Some(url) = env_non_empty("PLATE_SINK_URL") {
            self.sink.url = url;
        }
        if let Some(path) = env_non_empty("PLATE_REMOTE_PROCESSING") {
            self.remote.processing = path;
        }
        if let Some(path) = env_non_empty("PLATE_REMOTE_DONE") {
            self.remote.done = path;
        }
        if let Some(flags) = env_non_empty("PLATE_RCLONE_FLAGS") {
            self.remote.rclone_flags = split_csv(&flags);
        }
        if let Some(root) = env_non_empty("PLATE_WORKSPACE") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(path) = env_non_empty("PLATE_DETECTOR_MODEL") {
            self.models.detector = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("PLATE_RECOGNIZER_MODEL") {
            self.models.recognizer = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("PLATE_RECOGNIZER_DICT") {
            self.models.recognizer_dictionary = PathBuf::from(path);
        }
        if let Some(value) = env_non_empty("PLATE_DETECTION_THRESHOLD") {
            self.pipeline.detection_threshold = value
                .parse()
                .map_err(|_| anyhow!("PLATE_DETECTION_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_non_empty("PLATE_RECOGNITION_THRESHOLD") {
            self.pipeline.recognition_threshold = value
                .parse()
                .map_err(|_| anyhow!("PLATE_RECOGNITION_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_non_empty("PLATE_FRAME_STRIDE") {
            self.pipeline.frame_stride = value
                .parse()
                .map_err(|_| anyhow!("PLATE_FRAME_STRIDE must be a positive integer"))?;
        }
        if let Some(value) = env_non_empty("PLATE_POLL_BACKOFF_SECS") {
            let seconds: u64 = value.parse().map_err(|_| {
                anyhow!("PLATE_POLL_BACKOFF_SECS must be an integer number of seconds")
            })?;
            self.poll_backoff = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.pipeline.validate()?;
        validate_http_url("queue url", &self.queue.url)?;
        validate_http_url("sink url", &self.sink.url)?;
        if self.poll_backoff.is_zero() {
            return Err(anyhow!("poll backoff must be greater than zero"));
        }
        if self.queue.timeout.is_zero() || self.sink.timeout.is_zero() {
            return Err(anyhow!("endpoint timeouts must be greater than zero"));
        }
        if self.remote.processing.trim().is_empty() || self.remote.done.trim().is_empty() {
            return Err(anyhow!("remote processing and done locations must be set"));
        }
        if self.models.detector_input_width == 0 || self.models.detector_input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        self.worker_id = self.worker_id.trim().to_string();
        if self.worker_id.is_empty() {
            self.worker_id = FALLBACK_WORKER_ID.to_string();
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WorkerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| anyhow!("{} '{}' is invalid: {}", name, value, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "{} must use http or https, got scheme '{}'",
            name,
            other
        )),
    }
}

fn host_worker_id() -> String {
    let name = gethostname::gethostname().to_string_lossy().trim().to_string();
    if name.is_empty() {
        FALLBACK_WORKER_ID.to_string()
    } else {
        name
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let cfg = WorkerConfig::from_file(WorkerConfigFile::default());
        assert_eq!(cfg.queue.url, DEFAULT_QUEUE_URL);
        assert_eq!(cfg.queue.timeout, Duration::from_secs(20));
        assert_eq!(cfg.sink.timeout, Duration::from_secs(10));
        assert_eq!(cfg.poll_backoff, Duration::from_secs(10));
        assert_eq!(cfg.pipeline, PipelineSettings::default());
        assert_eq!(cfg.remote.rclone_flags, vec!["--drive-shared-with-me"]);
        assert_eq!(cfg.workspace_root, PathBuf::from("/workspace"));
        assert!(!cfg.keep_workdir);
    }

    #[test]
    fn validate_rejects_non_http_endpoints() {
        let mut cfg = WorkerConfig::from_file(WorkerConfigFile::default());
        cfg.sink.url = "ftp://collector".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_worker_id_falls_back() {
        let mut cfg = WorkerConfig::from_file(WorkerConfigFile::default());
        cfg.worker_id = "   ".to_string();
        cfg.validate().unwrap();
        assert_eq!(cfg.worker_id, FALLBACK_WORKER_ID);
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" --a, ,--b=1 "), vec!["--a", "--b=1"]);
    }
}
