//! Core domain types shared by every stage of the pipeline.

pub mod artifact;
pub mod build;
pub mod credential;
pub mod tag;
pub mod version;

pub use artifact::{ArtifactConfig, BuiltArtifact, ImageHandle};
pub use build::{BuildSpec, DEFAULT_FLAVOUR, DEFAULT_PLATFORM, DEFAULT_RUNTIME_VERSION};
pub use credential::{RegistryCredential, Secret, DEFAULT_REGISTRY};
pub use tag::Tag;
pub use version::ResolvedVersion;
