//! tagforge - release-driven container image builds
//!
//! ## Commands
//!
//! - `list-tags`: list the upstream repository's tags
//! - `resolve`: show which versions a selection policy picks
//! - `build`: build the image matrix for the selected versions
//! - `publish`: build, attach and publish one multi-platform reference per release

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use tagforge_core::config::{MatrixDefaults, SECRET_ENV};
use tagforge_core::obs::SessionSpan;
use tagforge_core::telemetry::init_tracing;
use tagforge_core::{
    ArtifactConfig, BuildMatrix, BuiltArtifact, Collaborators, RegistryCredential, Secret, SelectionPolicy,
    Session, TagforgeConfig,
};

#[derive(Parser)]
#[command(name = "tagforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and publish container images for upstream release tags", long_about = None)]
struct Cli {
    /// Raise log verbosity (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "TAGFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream repository whose tags define the releases
    #[arg(long, global = true)]
    repository: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tags of the upstream repository
    ListTags {
        /// Print JSON instead of one tag per line
        #[arg(long)]
        output_json: bool,
    },

    /// Show the versions a selection policy resolves to
    Resolve {
        #[command(flatten)]
        versions: VersionArgs,

        /// Print JSON instead of one version per line
        #[arg(long)]
        output_json: bool,
    },

    /// Build every (flavour, runtime, version, platform) combination
    Build {
        #[command(flatten)]
        matrix: MatrixArgs,

        #[command(flatten)]
        versions: VersionArgs,

        /// Print JSON instead of one artifact per line
        #[arg(long)]
        output_json: bool,
    },

    /// Build the matrix, attach the results and publish them
    Publish {
        #[command(flatten)]
        matrix: MatrixArgs,

        #[command(flatten)]
        versions: VersionArgs,

        #[command(flatten)]
        registry: RegistryArgs,

        /// Print JSON instead of one reference per line
        #[arg(long)]
        output_json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Selection {
    /// The two newest minor lines of the newest major version
    Current,
    /// Every tag that parses as a version
    All,
}

#[derive(Args)]
struct VersionArgs {
    /// Which versions to build
    #[arg(long, value_enum, default_value_t = Selection::Current)]
    select: Selection,

    /// Anchor the two-minor window at this version instead of the newest one
    #[arg(long, value_name = "VERSION", conflicts_with = "versions")]
    up_to: Option<String>,

    /// Use exactly these tags (repeatable)
    #[arg(long = "version", value_name = "TAG")]
    versions: Vec<String>,
}

impl VersionArgs {
    fn policy(&self) -> SelectionPolicy {
        if !self.versions.is_empty() {
            return SelectionPolicy::Explicit(self.versions.clone());
        }
        if let Some(anchor) = &self.up_to {
            return SelectionPolicy::TwoMinorUpTo(anchor.clone());
        }
        match self.select {
            Selection::Current => SelectionPolicy::LatestTwoMinor,
            Selection::All => SelectionPolicy::All,
        }
    }
}

#[derive(Args)]
struct MatrixArgs {
    /// Image flavour (repeatable; default from config)
    #[arg(long = "flavour", value_name = "FLAVOUR")]
    flavours: Vec<String>,

    /// Runtime version (repeatable; default from config)
    #[arg(long = "runtime", value_name = "VERSION")]
    runtime_versions: Vec<String>,

    /// Target platform, e.g. linux/arm64 (repeatable; default from config)
    #[arg(long = "platform", value_name = "PLATFORM")]
    platforms: Vec<String>,

    /// Maximum number of concurrent builds
    #[arg(long)]
    concurrency: Option<usize>,
}

impl MatrixArgs {
    fn to_matrix(&self, defaults: &MatrixDefaults) -> BuildMatrix {
        let or_default = |given: &Vec<String>, fallback: &Vec<String>| {
            if given.is_empty() {
                fallback.clone()
            } else {
                given.clone()
            }
        };
        BuildMatrix::new(
            or_default(&self.flavours, &defaults.flavours),
            or_default(&self.runtime_versions, &defaults.runtime_versions),
            Vec::new(),
            or_default(&self.platforms, &defaults.platforms),
        )
    }
}

#[derive(Args)]
struct RegistryArgs {
    /// Registry address (default from config, then docker.io)
    #[arg(long)]
    registry: Option<String>,

    /// Registry username
    #[arg(long, env = "TAGFORGE_REGISTRY_USERNAME")]
    username: Option<String>,

    /// Environment variable holding the registry secret
    #[arg(long, default_value = SECRET_ENV)]
    secret_env: String,

    /// Repository namespace (defaults to the username)
    #[arg(long)]
    namespace: Option<String>,

    /// Extra tag pushed for the newest release, e.g. latest
    #[arg(long)]
    latest_alias: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, cli.verbose);

    let mut config =
        TagforgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(repository) = cli.repository {
        config.source.repository = repository;
    }

    match cli.command {
        Commands::ListTags { output_json } => cmd_list_tags(config, output_json).await,
        Commands::Resolve {
            versions,
            output_json,
        } => cmd_resolve(config, &versions, output_json).await,
        Commands::Build {
            matrix,
            versions,
            output_json,
        } => cmd_build(config, &matrix, &versions, output_json).await,
        Commands::Publish {
            matrix,
            versions,
            registry,
            output_json,
        } => cmd_publish(config, &matrix, &versions, registry, output_json).await,
    }
}

fn new_session(config: TagforgeConfig) -> Session {
    let collaborators = Collaborators::cli(&config);
    Session::new(config, collaborators)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

async fn cmd_list_tags(config: TagforgeConfig, output_json: bool) -> Result<()> {
    let session = new_session(config);
    let _span = SessionSpan::enter(&session.id().to_string());

    let tags = session.list_tags().await.context("Failed to list tags")?;
    if output_json {
        return print_json(&tags);
    }
    for tag in &tags {
        println!("{}\t{}", tag.name, tag.commit);
    }
    Ok(())
}

async fn cmd_resolve(config: TagforgeConfig, versions: &VersionArgs, output_json: bool) -> Result<()> {
    let session = new_session(config);
    let _span = SessionSpan::enter(&session.id().to_string());

    let policy = versions.policy();
    let resolved = session
        .resolve_versions(&policy)
        .await
        .with_context(|| format!("Failed to resolve versions ({policy})"))?;

    if output_json {
        let names: Vec<&str> = resolved.iter().map(|v| v.original()).collect();
        return print_json(&names);
    }
    for version in &resolved {
        println!("{version}");
    }
    Ok(())
}

fn print_artifacts(artifacts: &[BuiltArtifact], output_json: bool) -> Result<()> {
    if output_json {
        return print_json(&artifacts);
    }
    for artifact in artifacts {
        println!("{}", artifact_row(artifact));
    }
    Ok(())
}

/// One tab-separated line per image. Version, runtime and flavour are read
/// back from the image's labels so the line shows what the image carries;
/// the build spec fills anything the labels do not record.
fn artifact_row(artifact: &BuiltArtifact) -> String {
    let recovered = ArtifactConfig::from_labels(&artifact.labels);
    let spec = &artifact.spec;
    format!(
        "{}\t{}\t{}\t{}\t{}",
        recovered.app_version.as_deref().unwrap_or(&spec.app_version),
        recovered.flavour.as_deref().unwrap_or(&spec.flavour),
        recovered.runtime_version.as_deref().unwrap_or(&spec.runtime_version),
        spec.platform,
        artifact.image
    )
}

async fn cmd_build(
    mut config: TagforgeConfig,
    matrix: &MatrixArgs,
    versions: &VersionArgs,
    output_json: bool,
) -> Result<()> {
    if matrix.concurrency.is_some() {
        config.build.concurrency_limit = matrix.concurrency;
    }
    let build_matrix = matrix.to_matrix(&config.matrix);
    let session = new_session(config);
    let _span = SessionSpan::enter(&session.id().to_string());

    let built = session
        .build_for_policy(&build_matrix, &versions.policy())
        .await
        .context("Build failed")?;
    info!(artifacts = built.len(), "build finished");
    print_artifacts(&built, output_json)
}

async fn cmd_publish(
    mut config: TagforgeConfig,
    matrix: &MatrixArgs,
    versions: &VersionArgs,
    registry: RegistryArgs,
    output_json: bool,
) -> Result<()> {
    if matrix.concurrency.is_some() {
        config.build.concurrency_limit = matrix.concurrency;
    }
    if let Some(address) = registry.registry {
        config.registry.address = address;
    }
    if registry.namespace.is_some() {
        config.registry.namespace = registry.namespace;
    }
    if registry.latest_alias.is_some() {
        config.registry.latest_alias = registry.latest_alias;
    }

    let Some(username) = registry.username.or_else(|| config.registry.username.clone()) else {
        bail!("No registry username given (use --username or TAGFORGE_REGISTRY_USERNAME)");
    };
    let Some(secret) = Secret::from_env(&registry.secret_env) else {
        bail!("Registry secret not found in ${}", registry.secret_env);
    };
    let credential = RegistryCredential::new(config.registry.address.clone(), username, secret);

    let build_matrix = matrix.to_matrix(&config.matrix);
    let mut session = new_session(config);
    let _span = SessionSpan::enter(&session.id().to_string());

    session
        .with_containers_for_policy(&build_matrix, &versions.policy())
        .await
        .context("Build failed, nothing was published")?;
    session.with_registry_auth(credential);

    let report = session
        .publish_containers()
        .await
        .context("Failed to publish")?;

    let published: BTreeMap<String, String> = report.published.clone();
    if output_json {
        print_json(&published)?;
    } else {
        for (release, reference) in &published {
            println!("{release}\t{reference}");
        }
    }

    report.into_result().context("Publishing incomplete")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_args_policy() {
        let cli = Cli::parse_from(["tagforge", "resolve", "--select", "all"]);
        let Commands::Resolve { versions, .. } = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(versions.policy(), SelectionPolicy::All);

        let cli = Cli::parse_from(["tagforge", "resolve", "--version", "1.0.0", "--version", "1.1.0"]);
        let Commands::Resolve { versions, .. } = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(
            versions.policy(),
            SelectionPolicy::Explicit(vec!["1.0.0".to_string(), "1.1.0".to_string()])
        );

        let cli = Cli::parse_from(["tagforge", "resolve", "--up-to", "1.2.0"]);
        let Commands::Resolve { versions, .. } = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(versions.policy(), SelectionPolicy::TwoMinorUpTo("1.2.0".to_string()));
    }

    #[test]
    fn test_verbose_flag_counts() {
        let cli = Cli::parse_from(["tagforge", "list-tags"]);
        assert_eq!(cli.verbose, 0);
        let cli = Cli::parse_from(["tagforge", "-vv", "list-tags"]);
        assert_eq!(cli.verbose, 2);
        let cli = Cli::parse_from(["tagforge", "list-tags", "--verbose"]);
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_artifact_row_reads_labels() {
        use tagforge_core::labels::{LABEL_BASE_NAME, LABEL_VERSION};
        use tagforge_core::{BuildSpec, ImageHandle};

        let labels = BTreeMap::from([
            (LABEL_VERSION.to_string(), "v1.1.1".to_string()),
            (LABEL_BASE_NAME.to_string(), "docker.io/library/php:8.3-fpm".to_string()),
        ]);
        let artifact = BuiltArtifact::new(
            BuildSpec::new("apache", "8.2", "1.1.1", "linux/arm64"),
            ImageHandle::new("sha256:abc"),
            labels,
        );
        assert_eq!(
            artifact_row(&artifact),
            "v1.1.1\tfpm\t8.3\tlinux/arm64\tsha256:abc"
        );

        let bare = BuiltArtifact::new(
            BuildSpec::new("apache", "8.2", "1.0.0", "linux/amd64"),
            ImageHandle::new("sha256:def"),
            BTreeMap::new(),
        );
        assert_eq!(artifact_row(&bare), "1.0.0\tapache\t8.2\tlinux/amd64\tsha256:def");
    }

    #[test]
    fn test_matrix_args_fall_back_to_config() {
        let cli = Cli::parse_from([
            "tagforge",
            "build",
            "--platform",
            "linux/amd64",
            "--platform",
            "linux/arm64",
        ]);
        let Commands::Build { matrix, .. } = cli.command else {
            panic!("expected build");
        };
        let built = matrix.to_matrix(&MatrixDefaults::default());
        assert_eq!(built.flavours, vec!["apache"]);
        assert_eq!(built.runtime_versions, vec!["8.2"]);
        assert_eq!(built.platforms, vec!["linux/amd64", "linux/arm64"]);
    }
}
