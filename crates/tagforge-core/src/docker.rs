//! Docker CLI backed builder and registry client.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::BuildConfig;
use crate::domain::{BuildSpec, ImageHandle, RegistryCredential};
use crate::error::TransportError;
use crate::executor::{BuildRequest, BuiltImage, ImageBuilder};
use crate::labels::{LABEL_BASE_DIGEST, LABEL_BASE_NAME};
use crate::publisher::{PublishRequest, RegistryClient};

/// Build argument carrying the resolved base image.
pub const BUILD_ARG_BASE_IMAGE: &str = "BASE_IMAGE";
/// Build argument carrying the application version (the upstream tag).
pub const BUILD_ARG_APP_VERSION: &str = "APP_VERSION";

const LOCAL_REPOSITORY: &str = "tagforge-local";

/// Run `docker <args>`, optionally feeding `stdin`, and return stdout.
async fn run_docker(
    docker: &Path,
    args: &[String],
    stdin: Option<&str>,
) -> Result<String, TransportError> {
    let command_name = args.first().map(String::as_str).unwrap_or("docker");
    debug!(command = %command_name, args = ?args, "running docker");

    let mut child = Command::new(docker)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TransportError::Io(format!("failed to run docker {command_name}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TransportError::failed(format!(
            "docker {} failed ({}): {}",
            command_name,
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

// ---------------------------------------------------------------------------
// DockerCliBuilder
// ---------------------------------------------------------------------------

/// [`ImageBuilder`] that runs `docker buildx build --load` per spec.
#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
    docker: PathBuf,
    context_dir: PathBuf,
    base_image_template: String,
}

impl DockerCliBuilder {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            docker: config.docker.clone(),
            context_dir: config.context_dir.clone(),
            base_image_template: config.base_image.clone(),
        }
    }

    pub fn base_image_for(&self, spec: &BuildSpec) -> String {
        self.base_image_template
            .replace("{runtime}", &spec.runtime_version)
            .replace("{flavour}", &spec.flavour)
    }

    /// Deterministic local tag for a spec, so rebuilding the same spec
    /// replaces the previous local image.
    pub fn local_tag(spec: &BuildSpec) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &spec.flavour,
            &spec.runtime_version,
            &spec.app_version,
            &spec.platform,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        format!("{LOCAL_REPOSITORY}:{}", &digest[..16])
    }

    pub fn build_args(&self, request: &BuildRequest, base_image: &str, tag: &str) -> Vec<String> {
        let spec = &request.spec;
        let mut args = strings(["buildx", "build", "--platform"]);
        args.push(spec.platform.clone());
        args.push("--build-arg".to_string());
        args.push(format!("{BUILD_ARG_BASE_IMAGE}={base_image}"));
        args.push("--build-arg".to_string());
        args.push(format!("{BUILD_ARG_APP_VERSION}={}", spec.app_version));
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("--label".to_string());
        args.push(format!("{LABEL_BASE_NAME}={base_image}"));
        args.push("--tag".to_string());
        args.push(tag.to_string());
        args.push("--load".to_string());
        args.push(self.context_dir.to_string_lossy().into_owned());
        args
    }

    /// `sha256:...` digest of the locally pulled base image, if docker knows one.
    async fn base_digest(&self, base_image: &str) -> Result<Option<String>, TransportError> {
        let mut args = strings(["image", "inspect", "--format", "{{index .RepoDigests 0}}"]);
        args.push(base_image.to_string());
        let output = run_docker(&self.docker, &args, None).await?;
        Ok(parse_repo_digest(&output))
    }
}

/// Extract the digest from a `name@sha256:...` repo digest.
pub fn parse_repo_digest(raw: &str) -> Option<String> {
    raw.trim()
        .rsplit_once('@')
        .map(|(_, digest)| digest.to_string())
        .filter(|digest| digest.starts_with("sha256:"))
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, TransportError> {
        let base_image = self.base_image_for(&request.spec);
        let tag = Self::local_tag(&request.spec);
        let args = self.build_args(request, &base_image, &tag);

        run_docker(&self.docker, &args, None).await?;

        let mut labels = BTreeMap::new();
        match self.base_digest(&base_image).await {
            Ok(Some(digest)) => {
                labels.insert(LABEL_BASE_DIGEST.to_string(), digest);
            }
            Ok(None) => {}
            Err(e) => debug!(base_image = %base_image, error = %e, "base image digest unavailable"),
        }
        labels.insert(LABEL_BASE_NAME.to_string(), base_image);
        Ok(BuiltImage {
            image: ImageHandle::new(tag),
            labels,
        })
    }
}

// ---------------------------------------------------------------------------
// DockerCliRegistry
// ---------------------------------------------------------------------------

/// [`RegistryClient`] that pushes with `docker push` and assembles
/// multi-platform references with `docker manifest`.
#[derive(Debug)]
pub struct DockerCliRegistry {
    docker: PathBuf,
    logged_in: Mutex<HashSet<(String, String)>>,
}

impl DockerCliRegistry {
    pub fn new(docker: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    /// Per-platform reference a variant is pushed to before the manifest
    /// list is assembled, e.g. `repo:1.2.0-linux-arm64`.
    pub fn platform_reference(reference: &str, platform: &str) -> String {
        let slug: String = platform
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{reference}-{slug}")
    }

    pub fn manifest_create_args(reference: &str, platform_refs: &[String]) -> Vec<String> {
        let mut args = strings(["manifest", "create", "--amend"]);
        args.push(reference.to_string());
        args.extend(platform_refs.iter().cloned());
        args
    }

    async fn login(&self, credential: &RegistryCredential) -> Result<(), TransportError> {
        let key = (credential.address.clone(), credential.username.clone());
        let mut logged_in = self.logged_in.lock().await;
        if logged_in.contains(&key) {
            return Ok(());
        }

        let mut args = strings(["login"]);
        args.push(credential.address.clone());
        args.push("--username".to_string());
        args.push(credential.username.clone());
        args.push("--password-stdin".to_string());
        run_docker(&self.docker, &args, Some(credential.secret.expose())).await?;

        logged_in.insert(key);
        Ok(())
    }

    async fn tag_and_push(&self, source: &ImageHandle, target: &str) -> Result<(), TransportError> {
        let mut tag = strings(["tag", source.as_str()]);
        tag.push(target.to_string());
        run_docker(&self.docker, &tag, None).await?;

        let mut push = strings(["push"]);
        push.push(target.to_string());
        run_docker(&self.docker, &push, None).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for DockerCliRegistry {
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &RegistryCredential,
    ) -> Result<String, TransportError> {
        self.login(credential).await?;

        if request.variants.is_empty() {
            self.tag_and_push(&request.primary.image, &request.reference)
                .await?;
            return Ok(request.reference.clone());
        }

        let mut platform_refs = Vec::with_capacity(1 + request.variants.len());
        for image in request.images() {
            let target = Self::platform_reference(&request.reference, &image.platform);
            self.tag_and_push(&image.image, &target).await?;
            platform_refs.push(target);
        }

        let create = Self::manifest_create_args(&request.reference, &platform_refs);
        run_docker(&self.docker, &create, None).await?;

        let mut push = strings(["manifest", "push", "--purge"]);
        push.push(request.reference.clone());
        run_docker(&self.docker, &push, None).await?;

        Ok(request.reference.clone())
    }
}
