//! tagforge core library
//!
//! Resolves the release tags of an upstream repository, builds a container
//! image for every (flavour, runtime, version, platform) combination with
//! bounded concurrency, and publishes one multi-platform reference per
//! release.

mod deadline;

pub mod config;
pub mod docker;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod grouper;
pub mod labels;
pub mod matrix;
pub mod obs;
pub mod publisher;
pub mod selector;
pub mod session;
pub mod source;
pub mod telemetry;

pub use config::TagforgeConfig;
pub use docker::{DockerCliBuilder, DockerCliRegistry};
pub use domain::{
    ArtifactConfig, BuildSpec, BuiltArtifact, ImageHandle, RegistryCredential, ResolvedVersion,
    Secret, Tag,
};
pub use error::{GroupFailure, Result, TagforgeError, TransportError};
pub use executor::{BuildExecutor, BuildRequest, BuiltImage, ExecutorConfig, ImageBuilder};
pub use grouper::{group_by_release, ArtifactGroups, ReleaseGroup};
pub use labels::ImageMetadata;
pub use matrix::{expand, BuildMatrix};
pub use publisher::{
    AliasOutcome, PlatformImage, PublishOptions, PublishReport, PublishRequest, Publisher,
    RegistryClient,
};
pub use selector::{parse_version, select, SelectionPolicy};
pub use session::{Collaborators, Session};
pub use source::{parse_ref_listing, GitCliRefLister, RefLister, TagSource, TagSourceOptions};
