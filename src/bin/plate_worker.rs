//! plate_worker - licence plate extraction worker
//!
//! This daemon:
//! 1. Polls the job queue on behalf of this worker
//! 2. Fetches and unpacks each job's video archive
//! 3. Scans sampled frames for plates and reads their text
//! 4. Posts every confident reading to the collection endpoint
//! 5. Moves the processed archive into the done area

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use plate_worker::config::ModelSettings;
use plate_worker::detect::{StubDetector, StubRecognizer};
use plate_worker::ingest::SyntheticDecoder;
use plate_worker::{
    HttpJobQueue, HttpResultSink, IterationOutcome, JobRunner, PlateDetector, RcloneGateway,
    ShutdownSignal, TextRecognizer, VideoDecoder, WorkerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PLATE_WORKER_CONFIG")]
    config: Option<PathBuf>,
    /// Process at most one job, then exit.
    #[arg(long)]
    once: bool,
    /// Keep per-job working directories for inspection.
    #[arg(long)]
    keep_workdir: bool,
    /// Use scripted engines and synthetic frames instead of real models.
    #[arg(long)]
    dry_run: bool,
}

type Engines = (
    Box<dyn VideoDecoder>,
    Box<dyn PlateDetector>,
    Box<dyn TextRecognizer>,
);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = WorkerConfig::load_from(args.config.as_deref())?;
    if args.keep_workdir {
        cfg.keep_workdir = true;
    }
    log::info!(
        "plate_worker {} starting as worker '{}'",
        env!("CARGO_PKG_VERSION"),
        cfg.worker_id
    );

    let (decoder, mut detector, recognizer) = if args.dry_run {
        log::warn!("dry run: using stub engines and synthetic frames");
        dry_run_engines()
    } else {
        (
            build_decoder()?,
            build_detector(&cfg.models)?,
            build_recognizer(&cfg.models)?,
        )
    };
    detector.warm_up()?;

    let queue = HttpJobQueue::new(cfg.queue.url.clone(), cfg.worker_id.clone(), cfg.queue.timeout);
    let sink = HttpResultSink::new(cfg.sink.url.clone(), cfg.sink.timeout);
    let transfer = RcloneGateway::new(
        cfg.remote.rclone_binary.clone(),
        cfg.remote.rclone_flags.clone(),
    );

    let mut runner = JobRunner::new(
        cfg.runner_settings(),
        queue,
        transfer,
        sink,
        decoder,
        detector,
        recognizer,
    );

    if args.once {
        if runner.run_once() == IterationOutcome::Idle {
            log::info!("no job available");
        }
        return Ok(());
    }

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested, finishing current job...");
        handler_signal.request();
    })
    .expect("error setting Ctrl-C handler");

    runner.run(&shutdown);
    Ok(())
}

fn dry_run_engines() -> Engines {
    (
        Box::new(SyntheticDecoder::new(30, 640, 480)),
        Box::new(StubDetector::new()),
        Box::new(StubRecognizer::new()),
    )
}

#[cfg(feature = "decode-ffmpeg")]
fn build_decoder() -> Result<Box<dyn VideoDecoder>> {
    Ok(Box::new(plate_worker::ingest::FfmpegDecoder::new()?))
}

#[cfg(not(feature = "decode-ffmpeg"))]
fn build_decoder() -> Result<Box<dyn VideoDecoder>> {
    Err(anyhow!(
        "video decoding requires the decode-ffmpeg feature (or run with --dry-run)"
    ))
}

#[cfg(feature = "backend-tract")]
fn build_detector(models: &ModelSettings) -> Result<Box<dyn PlateDetector>> {
    let detector = plate_worker::detect::TractDetector::new(
        &models.detector,
        models.detector_input_width,
        models.detector_input_height,
    )?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn build_detector(models: &ModelSettings) -> Result<Box<dyn PlateDetector>> {
    Err(anyhow!(
        "plate detection with {} requires the backend-tract feature",
        models.detector.display()
    ))
}

#[cfg(feature = "backend-tract")]
fn build_recognizer(models: &ModelSettings) -> Result<Box<dyn TextRecognizer>> {
    let recognizer = plate_worker::detect::TractRecognizer::new(
        &models.recognizer,
        &models.recognizer_dictionary,
    )?;
    Ok(Box::new(recognizer))
}

#[cfg(not(feature = "backend-tract"))]
fn build_recognizer(models: &ModelSettings) -> Result<Box<dyn TextRecognizer>> {
    Err(anyhow!(
        "text recognition with {} requires the backend-tract feature",
        models.recognizer.display()
    ))
}
