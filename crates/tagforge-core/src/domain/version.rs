use std::cmp::Ordering;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::Tag;

/// A tag that parsed as a semantic version.
///
/// Ordering follows semantic-version precedence, with the original tag name
/// as tie-breaker so that `v1.0.0` and `1.0.0` sort deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedVersion {
    pub version: Version,
    pub tag: Tag,
}

impl ResolvedVersion {
    pub fn new(version: Version, tag: Tag) -> Self {
        Self { version, tag }
    }

    /// The tag string exactly as the upstream publishes it.
    pub fn original(&self) -> &str {
        &self.tag.name
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }
}

impl PartialEq for ResolvedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ResolvedVersion {}

impl PartialOrd for ResolvedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.tag.name.cmp(&other.tag.name))
    }
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.original())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(version: &str, name: &str) -> ResolvedVersion {
        ResolvedVersion::new(Version::parse(version).unwrap(), Tag::new(name, "abc"))
    }

    #[test]
    fn test_orders_by_semver_precedence() {
        let mut versions = vec![
            resolved("1.10.0", "1.10.0"),
            resolved("1.2.0", "1.2.0"),
            resolved("1.2.0-rc.1", "1.2.0-rc.1"),
        ];
        versions.sort();
        let names: Vec<_> = versions.iter().map(|v| v.original()).collect();
        assert_eq!(names, vec!["1.2.0-rc.1", "1.2.0", "1.10.0"]);
    }

    #[test]
    fn test_equal_versions_break_ties_on_tag_name() {
        let prefixed = resolved("1.0.0", "v1.0.0");
        let bare = resolved("1.0.0", "1.0.0");
        assert!(bare < prefixed);
        assert_ne!(bare, prefixed);
    }

    #[test]
    fn test_commit_does_not_affect_equality() {
        let a = ResolvedVersion::new(Version::new(1, 0, 0), Tag::new("1.0.0", "aaa"));
        let b = ResolvedVersion::new(Version::new(1, 0, 0), Tag::new("1.0.0", "bbb"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_components_and_prerelease() {
        let v = resolved("2.3.4-beta", "v2.3.4-beta");
        assert_eq!((v.major(), v.minor(), v.patch()), (2, 3, 4));
        assert!(v.is_prerelease());
        assert_eq!(v.to_string(), "v2.3.4-beta");
    }
}
