//! Structured lifecycle events for tag discovery, builds and publishing.
//!
//! Every event carries an `event` field (`tags.listed`, `job.failed`, ...)
//! so log pipelines can filter on it regardless of the output format.

use tracing::{info, warn};

use crate::domain::BuildSpec;

/// RAII guard that enters a session-scoped span for as long as it lives.
///
/// ```ignore
/// let _span = SessionSpan::enter(&session_id.to_string());
/// // every event below is tagged with session_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("tagforge.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_tags_listed(repository: &str, count: usize) {
    info!(event = "tags.listed", repository = %repository, count = count);
}

pub fn emit_versions_selected(policy: &str, candidates: usize, selected: usize) {
    info!(
        event = "versions.selected",
        policy = %policy,
        candidates = candidates,
        selected = selected,
    );
}

pub fn emit_batch_started(jobs: usize, concurrency: usize) {
    info!(event = "batch.started", jobs = jobs, concurrency = concurrency);
}

pub fn emit_job_started(job: usize, spec: &BuildSpec) {
    info!(
        event = "job.started",
        job = job,
        flavour = %spec.flavour,
        runtime_version = %spec.runtime_version,
        app_version = %spec.app_version,
        platform = %spec.platform,
    );
}

pub fn emit_job_finished(job: usize, spec: &BuildSpec, duration_ms: u64) {
    info!(
        event = "job.finished",
        job = job,
        app_version = %spec.app_version,
        platform = %spec.platform,
        duration_ms = duration_ms,
    );
}

pub fn emit_job_failed(job: usize, spec: &BuildSpec, error: &dyn std::fmt::Display) {
    warn!(
        event = "job.failed",
        job = job,
        app_version = %spec.app_version,
        platform = %spec.platform,
        error = %error,
    );
}

pub fn emit_batch_finished(jobs: usize, succeeded: usize, duration_ms: u64, success: bool) {
    info!(
        event = "batch.finished",
        jobs = jobs,
        succeeded = succeeded,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_group_published(release_tag: &str, reference: &str, platforms: usize) {
    info!(
        event = "publish.group_finished",
        release_tag = %release_tag,
        reference = %reference,
        platforms = platforms,
    );
}

pub fn emit_group_failed(release_tag: &str, error: &dyn std::fmt::Display) {
    warn!(event = "publish.group_failed", release_tag = %release_tag, error = %error);
}

pub fn emit_alias_published(release_tag: &str, reference: &str) {
    info!(event = "publish.alias_finished", release_tag = %release_tag, reference = %reference);
}

pub fn emit_alias_failed(release_tag: &str, alias: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "publish.alias_failed",
        release_tag = %release_tag,
        alias = %alias,
        error = %error,
    );
}
