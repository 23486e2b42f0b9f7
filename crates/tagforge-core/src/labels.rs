//! OCI image annotations stamped onto every build.
//!
//! The version label is what the grouper partitions artifacts by, and the
//! title label names the repository on publish, so both are always set.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BuildSpec;

pub const LABEL_TITLE: &str = "org.opencontainers.image.title";
pub const LABEL_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";
pub const LABEL_CREATED: &str = "org.opencontainers.image.created";
pub const LABEL_AUTHORS: &str = "org.opencontainers.image.authors";
pub const LABEL_URL: &str = "org.opencontainers.image.url";
pub const LABEL_DOCUMENTATION: &str = "org.opencontainers.image.documentation";
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";
pub const LABEL_VENDOR: &str = "org.opencontainers.image.vendor";
pub const LABEL_LICENSES: &str = "org.opencontainers.image.licenses";
pub const LABEL_BASE_NAME: &str = "org.opencontainers.image.base.name";
pub const LABEL_BASE_DIGEST: &str = "org.opencontainers.image.base.digest";

/// Descriptive image metadata, the `[image]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub title: String,
    pub description: Option<String>,
    pub authors: Option<String>,
    pub url: Option<String>,
    pub documentation: Option<String>,
    pub source: Option<String>,
    pub vendor: Option<String>,
    pub licenses: Option<String>,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            title: "wavelog".to_string(),
            description: Some(
                "Container for wavelog - Webbased Amateur Radio Logging Software".to_string(),
            ),
            authors: None,
            url: None,
            documentation: None,
            source: None,
            vendor: None,
            licenses: None,
        }
    }
}

impl ImageMetadata {
    /// Labels for one build job. `version` is the job's application version
    /// string exactly as the upstream tag spells it.
    pub fn labels_for(&self, spec: &BuildSpec, created: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_TITLE.to_string(), self.title.clone());
        labels.insert(LABEL_VERSION.to_string(), spec.app_version.clone());
        labels.insert(
            LABEL_CREATED.to_string(),
            created.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let optional = [
            (LABEL_DESCRIPTION, &self.description),
            (LABEL_AUTHORS, &self.authors),
            (LABEL_URL, &self.url),
            (LABEL_DOCUMENTATION, &self.documentation),
            (LABEL_SOURCE, &self.source),
            (LABEL_VENDOR, &self.vendor),
            (LABEL_LICENSES, &self.licenses),
        ];
        for (key, value) in optional {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                labels.insert(key.to_string(), value.clone());
            }
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_labels_carry_version_title_and_created() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let labels = ImageMetadata::default()
            .labels_for(&BuildSpec::for_version("v1.1.1"), created);

        assert_eq!(labels[LABEL_VERSION], "v1.1.1");
        assert_eq!(labels[LABEL_TITLE], "wavelog");
        assert_eq!(labels[LABEL_CREATED], "2024-03-01T12:00:00Z");
        assert!(labels.contains_key(LABEL_DESCRIPTION));
        assert!(!labels.contains_key(LABEL_VENDOR));
    }

    #[test]
    fn test_empty_optional_fields_are_skipped() {
        let metadata = ImageMetadata {
            vendor: Some(String::new()),
            licenses: Some("MIT".to_string()),
            ..ImageMetadata::default()
        };
        let labels = metadata.labels_for(&BuildSpec::for_version("1.0.0"), Utc::now());
        assert!(!labels.contains_key(LABEL_VENDOR));
        assert_eq!(labels[LABEL_LICENSES], "MIT");
    }
}
