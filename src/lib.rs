//! Plate Worker
//!
//! A headless batch worker that pulls video-processing jobs from a remote
//! queue, scans each video for vehicle licence plates, and reports every
//! confident plate reading back to a collection endpoint.
//!
//! # Job lifecycle
//!
//! 1. Poll the queue for a job (`queue`).
//! 2. Copy the job's zip archive from remote storage (`transfer`) into a
//!    per-job working directory (`workspace`).
//! 3. Extract it (`archive`) and pick the first video (`locate`).
//! 4. Decode frames (`ingest`), detect plates on every Nth frame and read
//!    the text of each crop (`detect`, `pipeline`).
//! 5. Post each normalized reading as it is produced (`sink`).
//! 6. Move the original archive into the done area, partitioned by job id.
//!
//! `runner` ties the steps together and owns the loop. All collaborators are
//! traits so the loop can be driven without a network, cloud storage, or
//! model files.

pub mod archive;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod job;
pub mod locate;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod sink;
pub mod transfer;
pub mod workspace;

pub use config::WorkerConfig;
pub use detect::{DetectionBox, PlateDetector, TextLine, TextRecognizer};
pub use frame::{CropRect, Frame, FrameSample};
pub use ingest::{FrameStream, VideoDecoder, VideoInfo};
pub use job::{Job, JobId, PlateReading};
pub use pipeline::{normalize_plate, FramePipeline, PipelineSettings, PipelineStats};
pub use queue::{HttpJobQueue, JobQueue};
pub use runner::{AbandonReason, IterationOutcome, JobRunner, RunnerSettings, ShutdownSignal};
pub use sink::{HttpResultSink, ResultSink};
pub use transfer::{RcloneGateway, TransferGateway};
