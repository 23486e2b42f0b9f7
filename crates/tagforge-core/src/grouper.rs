//! Partition built artifacts into release groups by their version label.

use serde::Serialize;

use crate::domain::BuiltArtifact;
use crate::error::{Result, TagforgeError};

/// Every artifact built for one release. Never empty; the first artifact
/// is the primary image, the rest are its platform variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseGroup {
    release_tag: String,
    artifacts: Vec<BuiltArtifact>,
}

impl ReleaseGroup {
    pub fn release_tag(&self) -> &str {
        &self.release_tag
    }

    pub fn artifacts(&self) -> &[BuiltArtifact] {
        &self.artifacts
    }

    pub fn primary(&self) -> &BuiltArtifact {
        &self.artifacts[0]
    }

    pub fn variants(&self) -> &[BuiltArtifact] {
        &self.artifacts[1..]
    }

    pub fn platforms(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.platform()).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Release groups in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactGroups {
    groups: Vec<ReleaseGroup>,
}

impl ArtifactGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReleaseGroup> {
        self.groups.iter()
    }

    pub fn get(&self, release_tag: &str) -> Option<&ReleaseGroup> {
        self.groups.iter().find(|g| g.release_tag == release_tag)
    }

    pub fn release_tags(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.release_tag.as_str()).collect()
    }

    fn push(&mut self, release_tag: &str, artifact: BuiltArtifact) {
        match self.groups.iter_mut().find(|g| g.release_tag == release_tag) {
            Some(group) => group.artifacts.push(artifact),
            None => self.groups.push(ReleaseGroup {
                release_tag: release_tag.to_string(),
                artifacts: vec![artifact],
            }),
        }
    }
}

impl<'a> IntoIterator for &'a ArtifactGroups {
    type Item = &'a ReleaseGroup;
    type IntoIter = std::slice::Iter<'a, ReleaseGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Group artifacts by release tag, preserving input order inside each group.
/// Fails on the first artifact without a version label.
pub fn group_by_release<I>(artifacts: I) -> Result<ArtifactGroups>
where
    I: IntoIterator<Item = BuiltArtifact>,
{
    let mut groups = ArtifactGroups::default();
    for artifact in artifacts {
        let Some(release_tag) = artifact.release_tag().map(str::to_string) else {
            return Err(TagforgeError::MissingVersionLabel {
                spec: artifact.spec,
            });
        };
        groups.push(&release_tag, artifact);
    }
    Ok(groups)
}
