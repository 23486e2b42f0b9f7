//! Concurrent multi-platform publishing of release groups.
//!
//! Groups are published independently: one group failing never stops the
//! others, and groups that succeeded are not rolled back. When a latest
//! alias is configured it is pushed for the current release only, after
//! that release's versioned reference succeeded.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::deadline::with_deadline;
use crate::domain::{ImageHandle, RegistryCredential};
use crate::error::{GroupFailure, Result, TagforgeError, TransportError};
use crate::grouper::{ArtifactGroups, ReleaseGroup};
use crate::obs;

/// One platform image of a multi-platform reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformImage {
    pub platform: String,
    pub image: ImageHandle,
}

/// Publish `primary` plus `variants` as one multi-platform `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub reference: String,
    pub primary: PlatformImage,
    pub variants: Vec<PlatformImage>,
}

impl PublishRequest {
    fn for_group(reference: String, group: &ReleaseGroup) -> Self {
        let to_platform = |a: &crate::domain::BuiltArtifact| PlatformImage {
            platform: a.platform().to_string(),
            image: a.image.clone(),
        };
        Self {
            reference,
            primary: to_platform(group.primary()),
            variants: group.variants().iter().map(to_platform).collect(),
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &PlatformImage> {
        std::iter::once(&self.primary).chain(self.variants.iter())
    }
}

/// Pushes images to a container registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Publish the request and return the reference it is reachable at.
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &RegistryCredential,
    ) -> std::result::Result<String, TransportError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Repository namespace. Defaults to the credential's username.
    pub namespace: Option<String>,
    /// Extra tag (e.g. `latest`) pushed for the current release.
    pub latest_alias: Option<String>,
    /// Deadline for each registry call.
    pub timeout: Option<Duration>,
}

/// Outcome of the alias push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasOutcome {
    pub release_tag: String,
    pub alias: String,
    pub result: std::result::Result<String, TransportError>,
}

/// Per-group outcome of a publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Release tag to published reference.
    pub published: BTreeMap<String, String>,
    pub failures: Vec<GroupFailure>,
    pub alias: Option<AliasOutcome>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !matches!(self.alias, Some(AliasOutcome { result: Err(_), .. }))
    }

    /// Collapse the report into the published mapping, or the error that
    /// describes what did not go out.
    pub fn into_result(self) -> Result<BTreeMap<String, String>> {
        if !self.failures.is_empty() {
            return Err(TagforgeError::PublishFailed {
                failures: self.failures,
                published: self.published,
            });
        }
        if let Some(AliasOutcome {
            release_tag,
            alias,
            result: Err(cause),
        }) = self.alias
        {
            return Err(TagforgeError::AliasPublishFailed {
                release_tag,
                alias,
                cause,
            });
        }
        Ok(self.published)
    }
}

struct GroupOutcome {
    index: usize,
    release_tag: String,
    result: std::result::Result<String, String>,
    alias: Option<AliasOutcome>,
}

/// Publishes release groups through a [`RegistryClient`].
pub struct Publisher {
    registry: Arc<dyn RegistryClient>,
    options: PublishOptions,
}

impl Publisher {
    pub fn new(registry: Arc<dyn RegistryClient>, options: PublishOptions) -> Self {
        Self { registry, options }
    }

    /// `<address>/<namespace>/<name>:<tag>`
    pub fn reference_for(&self, credential: &RegistryCredential, name: &str, tag: &str) -> String {
        let namespace = self
            .options
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&credential.username);
        format!("{}/{}/{}:{}", credential.address, namespace, name, tag)
    }

    /// Publish every group concurrently.
    ///
    /// `current_release` names the group that receives the latest alias.
    /// Fails up front with [`TagforgeError::NoCredential`] when no credential
    /// is given, before any registry call.
    #[instrument(skip_all, fields(groups = groups.len()))]
    pub async fn publish(
        &self,
        groups: &ArtifactGroups,
        credential: Option<&RegistryCredential>,
        current_release: Option<&str>,
    ) -> Result<PublishReport> {
        let credential = credential.ok_or(TagforgeError::NoCredential)?;

        let mut tasks = JoinSet::new();
        for (index, group) in groups.iter().enumerate() {
            let release_tag = group.release_tag().to_string();
            let alias = self
                .options
                .latest_alias
                .clone()
                .filter(|alias| !alias.is_empty() && current_release == Some(release_tag.as_str()));

            let Some(name) = group.primary().title().map(str::to_string) else {
                let reason = "primary artifact has no title label".to_string();
                obs::emit_group_failed(&release_tag, &reason);
                tasks.spawn(async move {
                    GroupOutcome {
                        index,
                        release_tag,
                        result: Err(reason),
                        alias: None,
                    }
                });
                continue;
            };

            let request = PublishRequest::for_group(
                self.reference_for(credential, &name, &release_tag),
                group,
            );
            let alias_request = alias.as_ref().map(|alias| PublishRequest {
                reference: self.reference_for(credential, &name, alias),
                ..request.clone()
            });
            let registry = Arc::clone(&self.registry);
            let credential = credential.clone();
            let timeout = self.options.timeout;

            tasks.spawn(async move {
                let platforms = 1 + request.variants.len();
                let result = AssertUnwindSafe(with_deadline(
                    "registry publish",
                    timeout,
                    registry.publish(&request, &credential),
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(TransportError::failed("publish task panicked")));

                let reference = match result {
                    Ok(reference) => {
                        obs::emit_group_published(&release_tag, &reference, platforms);
                        reference
                    }
                    Err(e) => {
                        obs::emit_group_failed(&release_tag, &e);
                        return GroupOutcome {
                            index,
                            release_tag,
                            result: Err(e.to_string()),
                            alias: None,
                        };
                    }
                };

                let alias = match (alias, alias_request) {
                    (Some(alias), Some(alias_request)) => {
                        let result =
                            with_deadline("registry publish", timeout, registry.publish(&alias_request, &credential))
                                .await;
                        match &result {
                            Ok(r) => obs::emit_alias_published(&release_tag, r),
                            Err(e) => obs::emit_alias_failed(&release_tag, &alias, e),
                        }
                        Some(AliasOutcome {
                            release_tag: release_tag.clone(),
                            alias,
                            result,
                        })
                    }
                    _ => None,
                };

                GroupOutcome {
                    index,
                    release_tag,
                    result: Ok(reference),
                    alias,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(groups.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "publish task aborted"),
            }
        }
        outcomes.sort_by_key(|o| o.index);

        let mut report = PublishReport::default();
        let mut seen = vec![false; groups.len()];
        for outcome in outcomes {
            seen[outcome.index] = true;
            match outcome.result {
                Ok(reference) => {
                    report.published.insert(outcome.release_tag, reference);
                }
                Err(reason) => report.failures.push(GroupFailure {
                    release_tag: outcome.release_tag,
                    reason,
                }),
            }
            if outcome.alias.is_some() {
                report.alias = outcome.alias;
            }
        }
        for (group, _) in groups.iter().zip(seen).filter(|(_, seen)| !seen) {
            report.failures.push(GroupFailure {
                release_tag: group.release_tag().to_string(),
                reason: "publish task aborted".to_string(),
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuildSpec, BuiltArtifact, Secret};
    use crate::fakes::RecordingRegistry;
    use crate::grouper::group_by_release;
    use crate::labels::{LABEL_TITLE, LABEL_VERSION};

    fn artifact(version: &str, platform: &str) -> BuiltArtifact {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_VERSION.to_string(), version.to_string());
        labels.insert(LABEL_TITLE.to_string(), "wavelog".to_string());
        BuiltArtifact::new(
            BuildSpec::new("apache", "8.2", version, platform),
            ImageHandle::new(format!("local/{version}/{platform}")),
            labels,
        )
    }

    fn credential() -> RegistryCredential {
        RegistryCredential::new("docker.io", "bot", Secret::new("s3cret"))
    }

    fn groups() -> ArtifactGroups {
        group_by_release(vec![
            artifact("1.1.0", "linux/amd64"),
            artifact("1.1.0", "linux/arm64"),
            artifact("1.2.0", "linux/amd64"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_credential_makes_no_calls() {
        let registry = Arc::new(RecordingRegistry::new());
        let publisher = Publisher::new(registry.clone(), PublishOptions::default());
        let err = publisher.publish(&groups(), None, None).await.unwrap_err();
        assert!(matches!(err, TagforgeError::NoCredential));
        assert_eq!(registry.call_count(), 0);
    }

    #[tokio::test]
    async fn test_publishes_each_group_as_one_reference() {
        let registry = Arc::new(RecordingRegistry::new());
        let publisher = Publisher::new(registry.clone(), PublishOptions::default());
        let report = publisher
            .publish(&groups(), Some(&credential()), None)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.published["1.1.0"], "docker.io/bot/wavelog:1.1.0");
        assert_eq!(report.published["1.2.0"], "docker.io/bot/wavelog:1.2.0");

        let multi = registry
            .calls()
            .into_iter()
            .find(|r| r.reference.ends_with(":1.1.0"))
            .unwrap();
        assert_eq!(multi.primary.platform, "linux/amd64");
        assert_eq!(multi.variants.len(), 1);
        assert_eq!(multi.variants[0].platform, "linux/arm64");
    }

    #[tokio::test]
    async fn test_namespace_overrides_username() {
        let registry = Arc::new(RecordingRegistry::new());
        let options = PublishOptions {
            namespace: Some("hamradio".to_string()),
            ..PublishOptions::default()
        };
        let publisher = Publisher::new(registry, options);
        assert_eq!(
            publisher.reference_for(&credential(), "wavelog", "1.0.0"),
            "docker.io/hamradio/wavelog:1.0.0"
        );
    }

    #[tokio::test]
    async fn test_failed_group_does_not_stop_others() {
        let registry = Arc::new(RecordingRegistry::new().failing_for("1.1.0"));
        let publisher = Publisher::new(registry.clone(), PublishOptions::default());
        let report = publisher
            .publish(&groups(), Some(&credential()), None)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].release_tag, "1.1.0");
        assert!(report.published.contains_key("1.2.0"));
        assert_eq!(registry.call_count(), 2);

        match report.into_result().unwrap_err() {
            TagforgeError::PublishFailed { failures, published } => {
                assert_eq!(failures.len(), 1);
                assert!(published.contains_key("1.2.0"));
            }
            other => panic!("expected PublishFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_alias_published_for_current_release_only() {
        let registry = Arc::new(RecordingRegistry::new());
        let options = PublishOptions {
            latest_alias: Some("latest".to_string()),
            ..PublishOptions::default()
        };
        let publisher = Publisher::new(registry.clone(), options);
        let report = publisher
            .publish(&groups(), Some(&credential()), Some("1.2.0"))
            .await
            .unwrap();

        let alias = report.alias.clone().unwrap();
        assert_eq!(alias.release_tag, "1.2.0");
        assert_eq!(alias.result, Ok("docker.io/bot/wavelog:latest".to_string()));

        let refs: Vec<_> = registry.calls().into_iter().map(|r| r.reference).collect();
        let versioned = refs.iter().position(|r| r.ends_with(":1.2.0")).unwrap();
        let latest = refs.iter().position(|r| r.ends_with(":latest")).unwrap();
        assert!(versioned < latest);
        assert_eq!(refs.len(), 3);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_alias_failure_reported_separately() {
        let registry = Arc::new(RecordingRegistry::new().failing_for("latest"));
        let options = PublishOptions {
            latest_alias: Some("latest".to_string()),
            ..PublishOptions::default()
        };
        let publisher = Publisher::new(registry, options);
        let report = publisher
            .publish(&groups(), Some(&credential()), Some("1.2.0"))
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert!(report.published.contains_key("1.2.0"));
        assert!(!report.is_success());
        assert!(matches!(
            report.into_result(),
            Err(TagforgeError::AliasPublishFailed { ref alias, .. }) if alias == "latest"
        ));
    }

    #[tokio::test]
    async fn test_missing_title_fails_only_that_group() {
        let mut untitled = artifact("1.0.0", "linux/amd64");
        untitled.labels.remove(LABEL_TITLE);
        let groups = group_by_release(vec![untitled, artifact("1.2.0", "linux/amd64")]).unwrap();

        let registry = Arc::new(RecordingRegistry::new());
        let publisher = Publisher::new(registry.clone(), PublishOptions::default());
        let report = publisher
            .publish(&groups, Some(&credential()), None)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].release_tag, "1.0.0");
        assert_eq!(registry.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_registry_times_out() {
        let registry = Arc::new(RecordingRegistry::new().with_delay(Duration::from_secs(120)));
        let options = PublishOptions {
            timeout: Some(Duration::from_secs(10)),
            ..PublishOptions::default()
        };
        let publisher = Publisher::new(registry, options);
        let report = publisher
            .publish(&groups(), Some(&credential()), None)
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.reason.contains("timed out")));
    }
}
