use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::BuildSpec;
use crate::labels::{LABEL_BASE_NAME, LABEL_TITLE, LABEL_VERSION};

/// Opaque handle to a locally built image, as returned by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(String);

impl ImageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The output of a successful build job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltArtifact {
    pub spec: BuildSpec,
    pub image: ImageHandle,
    pub labels: BTreeMap<String, String>,
}

impl BuiltArtifact {
    pub fn new(spec: BuildSpec, image: ImageHandle, labels: BTreeMap<String, String>) -> Self {
        Self {
            spec,
            image,
            labels,
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// The release this artifact belongs to, read from its version label.
    pub fn release_tag(&self) -> Option<&str> {
        self.label(LABEL_VERSION).filter(|v| !v.is_empty())
    }

    /// The image title, used as the repository name on publish.
    pub fn title(&self) -> Option<&str> {
        self.label(LABEL_TITLE).filter(|v| !v.is_empty())
    }

    pub fn platform(&self) -> &str {
        &self.spec.platform
    }
}

/// Build configuration recovered from an image's labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub flavour: Option<String>,
    pub runtime_version: Option<String>,
    pub app_version: Option<String>,
}

impl ArtifactConfig {
    /// Reads the release version label and splits the base image tag
    /// (`php:8.2-apache` or `docker.io/library/php:8.2-apache`) into runtime
    /// version and flavour. Missing or malformed labels yield `None` fields.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let app_version = labels.get(LABEL_VERSION).cloned();
        let (runtime_version, flavour) = labels
            .get(LABEL_BASE_NAME)
            .and_then(|base| base.rsplit_once(':'))
            .and_then(|(_, tag)| tag.split_once('-'))
            .map(|(runtime, flavour)| (Some(runtime.to_string()), Some(flavour.to_string())))
            .unwrap_or((None, None));

        Self {
            flavour,
            runtime_version,
            app_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_release_tag_reads_version_label() {
        let artifact = BuiltArtifact::new(
            BuildSpec::for_version("1.2.0"),
            ImageHandle::new("sha256:abc"),
            labels(&[(LABEL_VERSION, "1.2.0"), (LABEL_TITLE, "wavelog")]),
        );
        assert_eq!(artifact.release_tag(), Some("1.2.0"));
        assert_eq!(artifact.title(), Some("wavelog"));
    }

    #[test]
    fn test_empty_version_label_is_missing() {
        let artifact = BuiltArtifact::new(
            BuildSpec::for_version("1.2.0"),
            ImageHandle::new("sha256:abc"),
            labels(&[(LABEL_VERSION, "")]),
        );
        assert_eq!(artifact.release_tag(), None);
    }

    #[test]
    fn test_artifact_config_from_labels() {
        let config = ArtifactConfig::from_labels(&labels(&[
            (LABEL_VERSION, "1.1.1"),
            (LABEL_BASE_NAME, "docker.io/library/php:8.3-fpm"),
        ]));
        assert_eq!(config.app_version.as_deref(), Some("1.1.1"));
        assert_eq!(config.runtime_version.as_deref(), Some("8.3"));
        assert_eq!(config.flavour.as_deref(), Some("fpm"));
    }

    #[test]
    fn test_artifact_config_tolerates_missing_labels() {
        let config = ArtifactConfig::from_labels(&BTreeMap::new());
        assert_eq!(config.app_version, None);
        assert_eq!(config.flavour, None);
        assert_eq!(config.runtime_version, None);
    }
}
