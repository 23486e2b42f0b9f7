use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_FLAVOUR: &str = "apache";
pub const DEFAULT_RUNTIME_VERSION: &str = "8.2";
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// One build job: a (flavour, runtime, application version, platform) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildSpec {
    pub flavour: String,
    pub runtime_version: String,
    pub app_version: String,
    pub platform: String,
}

impl BuildSpec {
    pub fn new(
        flavour: impl Into<String>,
        runtime_version: impl Into<String>,
        app_version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            flavour: flavour.into(),
            runtime_version: runtime_version.into(),
            app_version: app_version.into(),
            platform: platform.into(),
        }
    }

    /// A build for `app_version` using the default flavour, runtime and platform.
    pub fn for_version(app_version: impl Into<String>) -> Self {
        Self::new(
            DEFAULT_FLAVOUR,
            DEFAULT_RUNTIME_VERSION,
            app_version,
            DEFAULT_PLATFORM,
        )
    }

    /// Fill empty fields with the defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.flavour.is_empty() {
            self.flavour = DEFAULT_FLAVOUR.to_string();
        }
        if self.runtime_version.is_empty() {
            self.runtime_version = DEFAULT_RUNTIME_VERSION.to_string();
        }
        if self.platform.is_empty() {
            self.platform = DEFAULT_PLATFORM.to_string();
        }
        self
    }
}

impl fmt::Display for BuildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} runtime {} on {}",
            self.flavour, self.app_version, self.runtime_version, self.platform
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_defaults_fills_only_empty_fields() {
        let spec = BuildSpec::new("", "8.3", "1.2.0", "").with_defaults();
        assert_eq!(spec.flavour, "apache");
        assert_eq!(spec.runtime_version, "8.3");
        assert_eq!(spec.platform, "linux/amd64");
    }

    #[test]
    fn test_for_version_uses_defaults() {
        let spec = BuildSpec::for_version("1.1.1");
        assert_eq!(spec, BuildSpec::new("apache", "8.2", "1.1.1", "linux/amd64"));
    }

    #[test]
    fn test_display_mentions_every_dimension() {
        let shown = BuildSpec::new("fpm", "8.1", "1.0.0", "linux/arm64").to_string();
        for part in ["fpm", "8.1", "1.0.0", "linux/arm64"] {
            assert!(shown.contains(part), "{shown} missing {part}");
        }
    }
}
