//! Error taxonomy for tag resolution, image builds and registry publishing.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::domain::BuildSpec;

/// Failure reported by an external collaborator (git, image builder, registry).
///
/// Deadline expiry is reported as [`TransportError::TimedOut`], so callers
/// handle a slow collaborator exactly like a failing one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Failed(String),

    #[error("{operation} timed out after {after:?}")]
    TimedOut { operation: String, after: Duration },

    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        TransportError::Failed(message.into())
    }

    /// Whether this failure came from an exceeded deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// A release group that could not be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub release_tag: String,
    pub reason: String,
}

/// Errors produced by the orchestration engine.
#[derive(Debug, Error)]
pub enum TagforgeError {
    /// Listing tags of the upstream repository failed.
    #[error("tag source {repository} unavailable: {cause}")]
    SourceUnavailable {
        repository: String,
        #[source]
        cause: TransportError,
    },

    /// The upstream repository reported no tags at all.
    #[error("no tags found in {repository}")]
    EmptyResult { repository: String },

    /// None of the discovered tags parse as a semantic version.
    #[error("no valid semantic versions among {candidates} tag(s)")]
    NoValidVersions { candidates: usize },

    /// An explicitly requested version is not among the discovered tags.
    #[error("unknown version: {version}")]
    UnknownVersion { version: String },

    /// One job of a build batch failed; the whole batch is discarded.
    #[error("build job {job} ({spec}) failed: {cause}")]
    BatchBuildFailed {
        job: usize,
        spec: BuildSpec,
        #[source]
        cause: TransportError,
    },

    /// A built artifact lost its release version label.
    #[error("artifact for {spec} has no release version label")]
    MissingVersionLabel { spec: BuildSpec },

    /// Publishing was attempted without registry credentials.
    #[error("registry credentials are not set, configure them before publishing")]
    NoCredential,

    /// Publishing was attempted with no attached artifacts.
    #[error("nothing to publish: no artifacts are attached to the session")]
    NothingToPublish,

    /// One or more release groups failed to publish. Groups listed in
    /// `published` went out and are not rolled back.
    #[error("publishing failed for {}", describe_failures(.failures))]
    PublishFailed {
        failures: Vec<GroupFailure>,
        published: BTreeMap<String, String>,
    },

    /// The versioned publish succeeded but the alias tag did not.
    #[error("alias {alias} for release {release_tag} failed: {cause}")]
    AliasPublishFailed {
        release_tag: String,
        alias: String,
        #[source]
        cause: TransportError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_failures(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.release_tag, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, TagforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_display_names_operation() {
        let err = TransportError::TimedOut {
            operation: "image build".to_string(),
            after: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("image build timed out"));
    }

    #[test]
    fn test_batch_build_failed_names_spec() {
        let err = TagforgeError::BatchBuildFailed {
            job: 3,
            spec: BuildSpec::new("apache", "8.2", "1.2.0", "linux/arm64"),
            cause: TransportError::failed("exit code 1"),
        };
        let msg = err.to_string();
        assert!(msg.contains("job 3"));
        assert!(msg.contains("1.2.0"));
        assert!(msg.contains("linux/arm64"));
        assert!(msg.contains("exit code 1"));
    }

    #[test]
    fn test_publish_failed_lists_every_release() {
        let err = TagforgeError::PublishFailed {
            failures: vec![
                GroupFailure {
                    release_tag: "1.1.0".to_string(),
                    reason: "denied".to_string(),
                },
                GroupFailure {
                    release_tag: "1.2.0".to_string(),
                    reason: "timeout".to_string(),
                },
            ],
            published: BTreeMap::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.1.0 (denied)"));
        assert!(msg.contains("1.2.0 (timeout)"));
    }

    #[test]
    fn test_io_error_converts_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "git not found");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::Io(ref m) if m.contains("git not found")));
    }
}
