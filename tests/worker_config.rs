use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use plate_worker::config::WorkerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATE_WORKER_CONFIG",
        "PLATE_WORKER_ID",
        "PLATE_QUEUE_URL",
        "PLATE_SINK_URL",
        "PLATE_REMOTE_PROCESSING",
        "PLATE_REMOTE_DONE",
        "PLATE_RCLONE_FLAGS",
        "PLATE_WORKSPACE",
        "PLATE_DETECTION_THRESHOLD",
        "PLATE_RECOGNITION_THRESHOLD",
        "PLATE_FRAME_STRIDE",
        "PLATE_POLL_BACKOFF_SECS",
        "PLATE_DETECTOR_MODEL",
        "PLATE_RECOGNIZER_MODEL",
        "PLATE_RECOGNIZER_DICT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WorkerConfig::load().expect("load config");

    assert!(!cfg.worker_id.is_empty());
    assert_eq!(cfg.queue.url, "https://n8n.honeyhomes.in/webhook/vtm/get-job");
    assert_eq!(
        cfg.sink.url,
        "https://n8n.honeyhomes.in/webhook/vtm/plate-captured"
    );
    assert_eq!(cfg.queue.timeout, Duration::from_secs(20));
    assert_eq!(cfg.sink.timeout, Duration::from_secs(10));
    assert_eq!(cfg.poll_backoff, Duration::from_secs(10));
    assert_eq!(cfg.remote.processing, "gdrive:VTM Extractor/Processing Videos");
    assert_eq!(cfg.remote.done, "gdrive:VTM Extractor/Processed");
    assert_eq!(cfg.pipeline.frame_stride, 3);
    assert_eq!(cfg.pipeline.detection_threshold, 0.5);
    assert_eq!(cfg.pipeline.recognition_threshold, 0.6);
    assert_eq!(cfg.models.detector, PathBuf::from("/root/best.onnx"));

    let runner = cfg.runner_settings();
    assert_eq!(runner.workspace_root, PathBuf::from("/workspace"));
    assert_eq!(runner.remote_done, cfg.remote.done);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "worker_id": "gpu-box-2",
            "workspace_root": "/scratch/plates",
            "poll_backoff_secs": 30,
            "queue": { "url": "http://queue.local/get-job", "timeout_secs": 5 },
            "remote": {
                "processing": "drive:incoming",
                "rclone_flags": ["--drive-shared-with-me", "--retries=1"]
            },
            "pipeline": { "frame_stride": 5 },
            "models": { "detector": "/models/plates.onnx", "detector_input_width": 320 }
        }"#,
    );

    std::env::set_var("PLATE_WORKER_CONFIG", file.path());
    std::env::set_var("PLATE_WORKER_ID", "override-worker");
    std::env::set_var("PLATE_RECOGNITION_THRESHOLD", "0.75");
    std::env::set_var("PLATE_REMOTE_DONE", "drive:finished");

    let cfg = WorkerConfig::load().expect("load config");

    assert_eq!(cfg.worker_id, "override-worker");
    assert_eq!(cfg.workspace_root, PathBuf::from("/scratch/plates"));
    assert_eq!(cfg.poll_backoff, Duration::from_secs(30));
    assert_eq!(cfg.queue.url, "http://queue.local/get-job");
    assert_eq!(cfg.queue.timeout, Duration::from_secs(5));
    assert_eq!(cfg.remote.processing, "drive:incoming");
    assert_eq!(cfg.remote.done, "drive:finished");
    assert_eq!(
        cfg.remote.rclone_flags,
        vec!["--drive-shared-with-me", "--retries=1"]
    );
    assert_eq!(cfg.pipeline.frame_stride, 5);
    assert_eq!(cfg.pipeline.recognition_threshold, 0.75);
    assert_eq!(cfg.models.detector, PathBuf::from("/models/plates.onnx"));
    assert_eq!(cfg.models.detector_input_width, 320);
    assert_eq!(cfg.models.detector_input_height, 640);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
worker_id = "toml-worker"
keep_workdir = true

[sink]
url = "https://collector.example/plates"

[pipeline]
detection_threshold = 0.35
"#,
    );

    let cfg = WorkerConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.worker_id, "toml-worker");
    assert!(cfg.keep_workdir);
    assert_eq!(cfg.sink.url, "https://collector.example/plates");
    assert_eq!(cfg.pipeline.detection_threshold, 0.35);
}

#[test]
fn rclone_flags_env_is_comma_separated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PLATE_RCLONE_FLAGS", "--drive-shared-with-me, --fast-list");
    let cfg = WorkerConfig::load().expect("load config");
    assert_eq!(
        cfg.remote.rclone_flags,
        vec!["--drive-shared-with-me", "--fast-list"]
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("PLATE_DETECTION_THRESHOLD", "1.5"),
        ("PLATE_RECOGNITION_THRESHOLD", "high"),
        ("PLATE_FRAME_STRIDE", "0"),
        ("PLATE_POLL_BACKOFF_SECS", "0"),
        ("PLATE_QUEUE_URL", "ftp://queue.local"),
        ("PLATE_SINK_URL", "not a url"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            WorkerConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }

    clear_env();
}

#[test]
fn malformed_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(".json", "{ not json");
    assert!(WorkerConfig::load_from(Some(file.path())).is_err());
    assert!(WorkerConfig::load_from(Some(&file.path().with_extension("missing"))).is_err());
}
