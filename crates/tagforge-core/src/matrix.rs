//! Build matrix expansion.

use serde::{Deserialize, Serialize};

use crate::domain::{BuildSpec, ResolvedVersion};

/// The four dimensions of a build, expanded by Cartesian product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMatrix {
    pub flavours: Vec<String>,
    pub runtime_versions: Vec<String>,
    pub app_versions: Vec<String>,
    pub platforms: Vec<String>,
}

impl BuildMatrix {
    pub fn new(
        flavours: Vec<String>,
        runtime_versions: Vec<String>,
        app_versions: Vec<String>,
        platforms: Vec<String>,
    ) -> Self {
        Self {
            flavours,
            runtime_versions,
            app_versions,
            platforms,
        }
    }

    /// Replace the application versions with the original tag strings of `versions`.
    pub fn with_versions(mut self, versions: &[ResolvedVersion]) -> Self {
        self.app_versions = versions.iter().map(|v| v.original().to_string()).collect();
        self
    }

    pub fn job_count(&self) -> usize {
        self.flavours.len()
            * self.runtime_versions.len()
            * self.app_versions.len()
            * self.platforms.len()
    }

    pub fn expand(&self) -> Vec<BuildSpec> {
        expand(
            &self.flavours,
            &self.runtime_versions,
            &self.app_versions,
            &self.platforms,
        )
    }
}

/// Cartesian product of the four dimensions, nested as flavour, runtime,
/// application version, platform (platform varies fastest). An empty
/// dimension yields no jobs.
pub fn expand(
    flavours: &[String],
    runtime_versions: &[String],
    app_versions: &[String],
    platforms: &[String],
) -> Vec<BuildSpec> {
    let mut specs = Vec::with_capacity(
        flavours.len() * runtime_versions.len() * app_versions.len() * platforms.len(),
    );
    for flavour in flavours {
        for runtime_version in runtime_versions {
            for app_version in app_versions {
                for platform in platforms {
                    specs.push(BuildSpec::new(
                        flavour.as_str(),
                        runtime_version.as_str(),
                        app_version.as_str(),
                        platform.as_str(),
                    ));
                }
            }
        }
    }
    specs
}
