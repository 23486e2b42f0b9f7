//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `TAGFORGE_*` environment variables. Command-line flags are applied
//! on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_FLAVOUR, DEFAULT_PLATFORM, DEFAULT_REGISTRY, DEFAULT_RUNTIME_VERSION};
use crate::error::{Result, TagforgeError};
use crate::executor::ExecutorConfig;
use crate::labels::ImageMetadata;
use crate::publisher::PublishOptions;
use crate::source::TagSourceOptions;

pub const DEFAULT_REPOSITORY: &str = "https://github.com/wavelog/wavelog.git";
pub const DEFAULT_BASE_IMAGE: &str = "php:{runtime}-{flavour}";

/// Name of the environment variable holding the registry secret.
pub const SECRET_ENV: &str = "TAGFORGE_REGISTRY_SECRET";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagforgeConfig {
    pub source: SourceConfig,
    pub matrix: MatrixDefaults,
    pub build: BuildConfig,
    pub image: ImageMetadata,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Remote whose tags define the releases.
    pub repository: String,
    pub normalize_suffixes: bool,
    pub require_tags: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            normalize_suffixes: true,
            require_tags: true,
            timeout_secs: Some(60),
        }
    }
}

impl SourceConfig {
    pub fn options(&self) -> TagSourceOptions {
        TagSourceOptions {
            normalize_suffixes: self.normalize_suffixes,
            require_tags: self.require_tags,
            timeout: secs(self.timeout_secs),
        }
    }
}

/// Matrix dimensions used when the command line does not name any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixDefaults {
    pub flavours: Vec<String>,
    pub runtime_versions: Vec<String>,
    pub platforms: Vec<String>,
}

impl Default for MatrixDefaults {
    fn default() -> Self {
        Self {
            flavours: vec![DEFAULT_FLAVOUR.to_string()],
            runtime_versions: vec![DEFAULT_RUNTIME_VERSION.to_string()],
            platforms: vec![DEFAULT_PLATFORM.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum concurrent builds. Unset runs every job at once.
    pub concurrency_limit: Option<usize>,
    pub timeout_secs: Option<u64>,
    /// Docker build context containing the Dockerfile.
    pub context_dir: PathBuf,
    /// Base image template; `{runtime}` and `{flavour}` are substituted.
    pub base_image: String,
    pub docker: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            timeout_secs: None,
            context_dir: PathBuf::from("."),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            docker: PathBuf::from("docker"),
        }
    }
}

impl BuildConfig {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency_limit: self.concurrency_limit,
            build_timeout: secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub latest_alias: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_REGISTRY.to_string(),
            namespace: None,
            username: None,
            latest_alias: None,
            timeout_secs: None,
        }
    }
}

impl RegistryConfig {
    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            namespace: self.namespace.clone(),
            latest_alias: self.latest_alias.clone(),
            timeout: secs(self.timeout_secs),
        }
    }
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.filter(|s| *s > 0).map(Duration::from_secs)
}

impl TagforgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| TagforgeError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| TagforgeError::Config(format!("{}: {e}", path.display())))
    }

    /// Defaults, overlaid with `path` when given, overlaid with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()
    }

    /// Apply `TAGFORGE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `TAGFORGE_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(repository) = get("TAGFORGE_REPOSITORY") {
            self.source.repository = repository;
        }
        if let Some(limit) = get("TAGFORGE_BUILD_CONCURRENCY") {
            let limit = limit.trim().parse::<usize>().map_err(|e| {
                TagforgeError::Config(format!("TAGFORGE_BUILD_CONCURRENCY={limit}: {e}"))
            })?;
            self.build.concurrency_limit = Some(limit);
        }
        if let Some(context) = get("TAGFORGE_CONTEXT_DIR") {
            self.build.context_dir = PathBuf::from(context);
        }
        if let Some(docker) = get("TAGFORGE_DOCKER") {
            self.build.docker = PathBuf::from(docker);
        }
        if let Some(address) = get("TAGFORGE_REGISTRY_ADDRESS") {
            self.registry.address = address;
        }
        if let Some(namespace) = get("TAGFORGE_REGISTRY_NAMESPACE") {
            self.registry.namespace = Some(namespace);
        }
        if let Some(username) = get("TAGFORGE_REGISTRY_USERNAME") {
            self.registry.username = Some(username);
        }
        if let Some(alias) = get("TAGFORGE_LATEST_ALIAS") {
            self.registry.latest_alias = Some(alias);
        }
        Ok(self)
    }
}
