//! A build-and-publish session.
//!
//! A [`Session`] owns the configuration, the collaborators, the registry
//! credential and the artifacts attached so far. Artifacts are attached only
//! when a whole batch succeeded; publishing reads them back, groups them by
//! release and pushes every group.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TagforgeConfig;
use crate::docker::{DockerCliBuilder, DockerCliRegistry};
use crate::domain::{BuildSpec, BuiltArtifact, RegistryCredential, ResolvedVersion, Tag};
use crate::error::{Result, TagforgeError};
use crate::executor::{BuildExecutor, ImageBuilder};
use crate::grouper::group_by_release;
use crate::matrix::BuildMatrix;
use crate::publisher::{PublishReport, Publisher, RegistryClient};
use crate::selector::{parse_version, select, SelectionPolicy};
use crate::source::{GitCliRefLister, RefLister, TagSource};

/// The external systems a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub ref_lister: Arc<dyn RefLister>,
    pub builder: Arc<dyn ImageBuilder>,
    pub registry: Arc<dyn RegistryClient>,
}

impl Collaborators {
    pub fn new(
        ref_lister: Arc<dyn RefLister>,
        builder: Arc<dyn ImageBuilder>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            ref_lister,
            builder,
            registry,
        }
    }

    /// `git` for tags, `docker` for builds and pushes.
    pub fn cli(config: &TagforgeConfig) -> Self {
        Self::new(
            Arc::new(GitCliRefLister::new()),
            Arc::new(DockerCliBuilder::new(&config.build)),
            Arc::new(DockerCliRegistry::new(config.build.docker.clone())),
        )
    }
}

pub struct Session {
    id: Uuid,
    config: TagforgeConfig,
    collaborators: Collaborators,
    credential: Option<RegistryCredential>,
    artifacts: Vec<BuiltArtifact>,
}

impl Session {
    pub fn new(config: TagforgeConfig, collaborators: Collaborators) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, "session created");
        Self {
            id,
            config,
            collaborators,
            credential: None,
            artifacts: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &TagforgeConfig {
        &self.config
    }

    pub fn credential(&self) -> Option<&RegistryCredential> {
        self.credential.as_ref()
    }

    /// Artifacts attached so far, in attachment order.
    pub fn artifacts(&self) -> &[BuiltArtifact] {
        &self.artifacts
    }

    /// Set the credential used by [`Session::publish_containers`].
    pub fn with_registry_auth(&mut self, credential: RegistryCredential) -> &mut Self {
        self.credential = Some(credential);
        self
    }

    pub fn tag_source(&self) -> TagSource {
        TagSource::new(
            Arc::clone(&self.collaborators.ref_lister),
            self.config.source.options(),
        )
    }

    pub fn executor(&self) -> BuildExecutor {
        BuildExecutor::new(
            Arc::clone(&self.collaborators.builder),
            self.config.image.clone(),
            self.config.build.executor_config(),
        )
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.collaborators.registry),
            self.config.registry.publish_options(),
        )
    }

    /// Tags of the configured upstream repository.
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        self.tag_source().list_tags(&self.config.source.repository).await
    }

    pub async fn resolve_versions(&self, policy: &SelectionPolicy) -> Result<Vec<ResolvedVersion>> {
        let tags = self.list_tags().await?;
        select(&tags, policy)
    }

    /// The versions in the two newest minor lines.
    pub async fn current_versions(&self) -> Result<Vec<ResolvedVersion>> {
        self.resolve_versions(&SelectionPolicy::LatestTwoMinor).await
    }

    pub async fn all_versions(&self) -> Result<Vec<ResolvedVersion>> {
        self.resolve_versions(&SelectionPolicy::All).await
    }

    /// Build one container. Empty fields of `spec` take the defaults.
    pub async fn build_container(&self, spec: BuildSpec) -> Result<BuiltArtifact> {
        self.executor().build_one(spec.with_defaults()).await
    }

    /// Build one container and attach it.
    pub async fn with_container(&mut self, spec: BuildSpec) -> Result<&mut Self> {
        let artifact = self.build_container(spec).await?;
        self.artifacts.push(artifact);
        Ok(self)
    }

    /// Build every combination of `matrix`.
    pub async fn build_containers(&self, matrix: &BuildMatrix) -> Result<Vec<BuiltArtifact>> {
        self.executor().execute(matrix.expand()).await
    }

    /// Build every combination of `matrix` and attach the results. Nothing is
    /// attached if any job fails.
    pub async fn with_containers(&mut self, matrix: &BuildMatrix) -> Result<&mut Self> {
        let built = self.build_containers(matrix).await?;
        self.attach(built);
        Ok(self)
    }

    /// Build `matrix` for the versions `policy` selects. The matrix's own
    /// application versions are replaced.
    pub async fn build_for_policy(
        &self,
        matrix: &BuildMatrix,
        policy: &SelectionPolicy,
    ) -> Result<Vec<BuiltArtifact>> {
        let versions = self.resolve_versions(policy).await?;
        let matrix = matrix.clone().with_versions(&versions);
        info!(
            policy = %policy,
            versions = versions.len(),
            jobs = matrix.job_count(),
            "building matrix"
        );
        self.build_containers(&matrix).await
    }

    pub async fn with_containers_for_policy(
        &mut self,
        matrix: &BuildMatrix,
        policy: &SelectionPolicy,
    ) -> Result<&mut Self> {
        let built = self.build_for_policy(matrix, policy).await?;
        self.attach(built);
        Ok(self)
    }

    pub async fn build_for_current_versions(&self, matrix: &BuildMatrix) -> Result<Vec<BuiltArtifact>> {
        self.build_for_policy(matrix, &SelectionPolicy::LatestTwoMinor).await
    }

    pub async fn with_containers_for_current_versions(&mut self, matrix: &BuildMatrix) -> Result<&mut Self> {
        self.with_containers_for_policy(matrix, &SelectionPolicy::LatestTwoMinor)
            .await
    }

    pub async fn build_for_all_versions(&self, matrix: &BuildMatrix) -> Result<Vec<BuiltArtifact>> {
        self.build_for_policy(matrix, &SelectionPolicy::All).await
    }

    pub async fn with_containers_for_all_versions(&mut self, matrix: &BuildMatrix) -> Result<&mut Self> {
        self.with_containers_for_policy(matrix, &SelectionPolicy::All)
            .await
    }

    /// Attach already-built artifacts.
    pub fn attach(&mut self, artifacts: impl IntoIterator<Item = BuiltArtifact>) {
        self.artifacts.extend(artifacts);
    }

    /// Publish every attached artifact, one multi-platform reference per
    /// release. The newest non-prerelease release also receives the
    /// configured alias.
    ///
    /// Checks, in order: a credential is set, something is attached, every
    /// artifact carries a version label. Only then does it talk to the registry.
    pub async fn publish_containers(&self) -> Result<PublishReport> {
        let credential = self.credential.as_ref().ok_or(TagforgeError::NoCredential)?;
        if self.artifacts.is_empty() {
            return Err(TagforgeError::NothingToPublish);
        }

        let groups = group_by_release(self.artifacts.iter().cloned())?;
        let current = groups
            .release_tags()
            .into_iter()
            .filter_map(|tag| parse_version(tag).map(|v| (v, tag)))
            .filter(|(v, _)| v.pre.is_empty())
            .max()
            .map(|(_, tag)| tag.to_string());

        self.publisher()
            .publish(&groups, Some(credential), current.as_deref())
            .await
    }
}
