//! Bounded-concurrency build execution with all-or-nothing results.
//!
//! Jobs are dispatched in submission order. At most `concurrency_limit` run
//! at once. The first failure raises a cancel flag: jobs already running are
//! allowed to finish, jobs not yet started are never started, and the batch
//! returns only that failure.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, instrument};

use crate::deadline::with_deadline;
use crate::domain::{BuildSpec, BuiltArtifact, ImageHandle};
use crate::error::{Result, TagforgeError, TransportError};
use crate::labels::ImageMetadata;
use crate::obs;

/// What the builder is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub spec: BuildSpec,
    /// Labels the image must carry, including the release version label.
    pub labels: BTreeMap<String, String>,
}

/// What the builder returns for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub image: ImageHandle,
    /// Extra labels the builder stamped, e.g. the resolved base image.
    pub labels: BTreeMap<String, String>,
}

/// Builds one image for one spec.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> std::result::Result<BuiltImage, TransportError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of builds in flight. `None` or zero runs every job at once.
    pub concurrency_limit: Option<usize>,
    /// Per-job deadline.
    pub build_timeout: Option<Duration>,
}

/// Runs build jobs against an [`ImageBuilder`].
pub struct BuildExecutor {
    builder: Arc<dyn ImageBuilder>,
    metadata: ImageMetadata,
    config: ExecutorConfig,
}

struct JobOutcome {
    job: usize,
    spec: BuildSpec,
    labels: BTreeMap<String, String>,
    result: std::result::Result<BuiltImage, TransportError>,
    elapsed: Duration,
}

impl BuildExecutor {
    pub fn new(builder: Arc<dyn ImageBuilder>, metadata: ImageMetadata, config: ExecutorConfig) -> Self {
        Self {
            builder,
            metadata,
            config,
        }
    }

    /// Number of workers used for a batch of `jobs`.
    pub fn worker_count(&self, jobs: usize) -> usize {
        let jobs = jobs.max(1);
        match self.config.concurrency_limit {
            Some(limit) if limit > 0 => limit.min(jobs),
            _ => jobs,
        }
    }

    /// Build a single spec.
    pub async fn build_one(&self, spec: BuildSpec) -> Result<BuiltArtifact> {
        let mut built = self.execute(vec![spec.clone()]).await?;
        built.pop().ok_or(TagforgeError::BatchBuildFailed {
            job: 0,
            spec,
            cause: TransportError::failed("builder produced no artifact"),
        })
    }

    /// Build every spec. On success the artifacts are returned in submission
    /// order; on failure nothing is returned but the first failure.
    #[instrument(skip(self, specs), fields(jobs = specs.len()))]
    pub async fn execute(&self, specs: Vec<BuildSpec>) -> Result<Vec<BuiltArtifact>> {
        if specs.is_empty() {
            debug!("no build jobs submitted");
            return Ok(Vec::new());
        }

        let total = specs.len();
        let workers = self.worker_count(total);
        let created = Utc::now();
        let started = Instant::now();
        obs::emit_batch_started(total, workers);

        let semaphore = Arc::new(Semaphore::new(workers));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let mut pending: BTreeMap<usize, BuildSpec> = BTreeMap::new();
        let mut jobs = FuturesUnordered::new();

        for (job, spec) in specs.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if *cancel_rx.borrow() {
                debug!(job = job, "batch cancelled, not starting remaining jobs");
                break;
            }

            pending.insert(job, spec.clone());
            let request = BuildRequest {
                labels: self.metadata.labels_for(&spec, created),
                spec,
            };
            let builder = Arc::clone(&self.builder);
            let cancel_tx = Arc::clone(&cancel_tx);
            let timeout = self.config.build_timeout;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                obs::emit_job_started(job, &request.spec);
                let job_started = Instant::now();

                let result = AssertUnwindSafe(with_deadline(
                    "image build",
                    timeout,
                    builder.build(&request),
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(TransportError::failed("build task panicked")));

                if result.is_err() {
                    cancel_tx.send_replace(true);
                }

                JobOutcome {
                    job,
                    spec: request.spec,
                    labels: request.labels,
                    result,
                    elapsed: job_started.elapsed(),
                }
            });
            jobs.push(async move { (job, handle.await) });
        }

        let mut built: Vec<(usize, BuiltArtifact)> = Vec::with_capacity(total);
        let mut failure: Option<TagforgeError> = None;

        while let Some((job, joined)) = jobs.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    cancel_tx.send_replace(true);
                    let aborted = aborted_job_failure(&mut pending, job, &e);
                    if failure.is_none() {
                        failure = aborted;
                    }
                    continue;
                }
            };
            pending.remove(&outcome.job);

            match outcome.result {
                Ok(image) => {
                    obs::emit_job_finished(outcome.job, &outcome.spec, outcome.elapsed.as_millis() as u64);
                    let mut labels = image.labels;
                    labels.extend(outcome.labels);
                    built.push((
                        outcome.job,
                        BuiltArtifact::new(outcome.spec, image.image, labels),
                    ));
                }
                Err(cause) => {
                    obs::emit_job_failed(outcome.job, &outcome.spec, &cause);
                    if failure.is_none() {
                        failure = Some(TagforgeError::BatchBuildFailed {
                            job: outcome.job,
                            spec: outcome.spec,
                            cause,
                        });
                    }
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_batch_finished(total, built.len(), duration_ms, failure.is_none());

        if let Some(err) = failure {
            return Err(err);
        }

        built.sort_by_key(|(job, _)| *job);
        Ok(built.into_iter().map(|(_, artifact)| artifact).collect())
    }
}

/// The failure for a job whose task ended without producing an outcome.
fn aborted_job_failure(
    pending: &mut BTreeMap<usize, BuildSpec>,
    job: usize,
    reason: &dyn std::fmt::Display,
) -> Option<TagforgeError> {
    let spec = pending.remove(&job)?;
    Some(TagforgeError::BatchBuildFailed {
        job,
        spec,
        cause: TransportError::failed(format!("build task aborted: {reason}")),
    })
}
