//! Job runner: the worker's poll / fetch / scan / report / archive loop.
//!
//! Every iteration is self-contained. Failures degrade to "log and move on":
//! - no job or poll error: back off, poll again
//! - download, extraction, missing video: the job is abandoned without any
//!   requeue signal to the queue service
//! - unopenable video: scanned as an empty stream, then archived
//! - inference, decode, and delivery errors: logged inside the scan
//! - finalization errors: logged, the job still counts as done
//!
//! Abandoned jobs stay in the remote processing area. Whether the queue
//! service hands them out again is up to its own retry policy.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::archive::extract_archive;
use crate::detect::{PlateDetector, TextRecognizer};
use crate::ingest::VideoDecoder;
use crate::job::{Job, JobId};
use crate::locate::find_video;
use crate::pipeline::{FramePipeline, PipelineSettings, PipelineStats};
use crate::queue::JobQueue;
use crate::sink::ResultSink;
use crate::transfer::{remote_join, TransferGateway};
use crate::workspace::WorkDir;

/// Fixed parameters of the job loop.
#[derive(Clone, Debug)]
pub struct RunnerSettings {
    /// Local root; each job gets `<root>/<jobId>`.
    pub workspace_root: PathBuf,
    /// Remote area holding pending archives.
    pub remote_processing: String,
    /// Remote area receiving processed archives, partitioned by job id.
    pub remote_done: String,
    /// Wait after an empty or failed poll.
    pub poll_backoff: Duration,
    /// Keep job working directories after the iteration.
    pub keep_workdir: bool,
    pub pipeline: PipelineSettings,
}

/// Why a claimed job was dropped before scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbandonReason {
    Workspace,
    Download,
    Extract,
    NoVideo,
}

/// Result of one loop iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum IterationOutcome {
    /// No job was claimed; the caller should back off.
    Idle,
    Abandoned {
        job_id: JobId,
        reason: AbandonReason,
    },
    Completed {
        job_id: JobId,
        stats: PipelineStats,
        archived: bool,
    },
}

/// Cooperative shutdown flag shared with signal handlers.
///
/// The runner checks it between iterations and while backing off; a job in
/// progress always runs to completion.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, condvar) = &*self.state;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (flag, _) = &*self.state;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`. Returns `true` as soon as shutdown is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.state;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |requested| !*requested)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Sequential job loop over injected collaborators.
///
/// Inference engines are constructed by the caller, typically once at
/// process start, and reused for every job.
pub struct JobRunner<Q, T, S, V, D, R> {
    settings: RunnerSettings,
    queue: Q,
    transfer: T,
    sink: S,
    decoder: V,
    detector: D,
    recognizer: R,
}

impl<Q, T, S, V, D, R> JobRunner<Q, T, S, V, D, R>
where
    Q: JobQueue,
    T: TransferGateway,
    S: ResultSink,
    V: VideoDecoder,
    D: PlateDetector,
    R: TextRecognizer,
{
    pub fn new(
        settings: RunnerSettings,
        queue: Q,
        transfer: T,
        sink: S,
        decoder: V,
        detector: D,
        recognizer: R,
    ) -> Self {
        Self {
            settings,
            queue,
            transfer,
            sink,
            decoder,
            detector,
            recognizer,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// Run until `shutdown` is requested.
    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        log::info!(
            "job loop started (detector={}, recognizer={})",
            self.detector.name(),
            self.recognizer.name()
        );
        while !shutdown.is_requested() {
            if self.run_once() == IterationOutcome::Idle {
                log::info!(
                    "no job. sleeping {}s...",
                    self.settings.poll_backoff.as_secs_f32()
                );
                if shutdown.wait(self.settings.poll_backoff) {
                    break;
                }
            }
        }
        log::info!("job loop stopped");
    }

    /// Poll once and, if a job is claimed, process it to completion.
    pub fn run_once(&mut self) -> IterationOutcome {
        let job = match self.queue.poll() {
            Ok(Some(job)) => job,
            Ok(None) => return IterationOutcome::Idle,
            Err(e) => {
                log::warn!("error polling job: {:#}", e);
                return IterationOutcome::Idle;
            }
        };

        log::info!("job received: {} ({})", job.job_id, job.file_name);
        let outcome = self.process(&job);
        match &outcome {
            IterationOutcome::Abandoned { job_id, reason } => {
                log::warn!("job {} abandoned: {:?}", job_id, reason);
            }
            IterationOutcome::Completed {
                job_id,
                stats,
                archived,
            } => {
                log::info!(
                    "job {} finished: frames={} sampled={} boxes={} recognitions={} readings={} archived={}",
                    job_id,
                    stats.frames_decoded,
                    stats.frames_sampled,
                    stats.boxes_detected,
                    stats.recognitions,
                    stats.readings,
                    archived
                );
            }
            IterationOutcome::Idle => {}
        }
        outcome
    }

    fn process(&mut self, job: &Job) -> IterationOutcome {
        let abandon = |reason| IterationOutcome::Abandoned {
            job_id: job.job_id.clone(),
            reason,
        };

        let workdir = match WorkDir::create(
            &self.settings.workspace_root,
            &job.job_id,
            self.settings.keep_workdir,
        ) {
            Ok(workdir) => workdir,
            Err(e) => {
                log::error!("{:#}", e);
                return abandon(AbandonReason::Workspace);
            }
        };

        log::info!("downloading {}...", job.file_name);
        let source = job.retrieval_location(&self.settings.remote_processing);
        if !self.transfer.copy(&source, workdir.path()) {
            log::warn!("download failed: {}", source);
            return abandon(AbandonReason::Download);
        }

        let archive_path = workdir.path().join(&job.file_name);
        if let Err(e) = extract_archive(&archive_path, workdir.path()) {
            log::warn!("extraction failed: {:#}", e);
            return abandon(AbandonReason::Extract);
        }

        let video_path = match find_video(workdir.path()) {
            Ok(Some(path)) => path,
            Ok(None) => {
                log::warn!("no video found inside {}", job.file_name);
                return abandon(AbandonReason::NoVideo);
            }
            Err(e) => {
                log::warn!("video lookup failed: {:#}", e);
                return abandon(AbandonReason::NoVideo);
            }
        };
        log::info!("video found: {}", video_path.display());

        let stats = self.scan(&job.job_id, &video_path);

        let archived = self.finalize(job);
        IterationOutcome::Completed {
            job_id: job.job_id.clone(),
            stats,
            archived,
        }
    }

    /// Stream readings to the sink.
    ///
    /// A video that cannot be opened scans as an empty, failed stream so the
    /// job is still archived.
    fn scan(&mut self, job_id: &JobId, video_path: &Path) -> PipelineStats {
        let frames = match self.decoder.open(video_path) {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("cannot open video {}: {:#}", video_path.display(), e);
                return PipelineStats {
                    decode_failed: true,
                    ..PipelineStats::default()
                };
            }
        };
        let info = frames.info();
        log::info!(
            "scanning {}x{} @ {:.2} fps, stride {}",
            info.width,
            info.height,
            info.fps,
            self.settings.pipeline.frame_stride
        );

        let mut pipeline = FramePipeline::new(
            job_id.clone(),
            frames,
            &mut self.detector,
            &mut self.recognizer,
            self.settings.pipeline,
        );
        for reading in pipeline.by_ref() {
            self.sink.send(&reading);
        }
        pipeline.stats()
    }

    /// Move the processed archive into the done area. Returns whether the move succeeded.
    fn finalize(&mut self, job: &Job) -> bool {
        let done_dir = job.done_location(&self.settings.remote_done);
        if !self.transfer.mkdir(&done_dir) {
            log::warn!("could not create archive destination {}", done_dir);
        }

        let source = job.retrieval_location(&self.settings.remote_processing);
        let dest = remote_join(&done_dir, &job.file_name);
        let moved = self.transfer.move_to(&source, &dest);
        if !moved {
            log::error!("failed to archive {} to {}", source, dest);
        }
        moved
    }
}
