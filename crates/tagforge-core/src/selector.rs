//! Version selection over discovered tags.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ResolvedVersion, Tag};
use crate::error::{Result, TagforgeError};
use crate::obs;

/// Which of the discovered versions to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "versions", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Every tag that parses as a version.
    All,
    /// The newest version and every release in its own minor line or the
    /// one before it, within the same major version.
    LatestTwoMinor,
    /// Like [`SelectionPolicy::LatestTwoMinor`], but anchored at the given
    /// version instead of the newest one.
    TwoMinorUpTo(String),
    /// Exactly these tags. Each one must be among the discovered versions.
    Explicit(Vec<String>),
}

impl SelectionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionPolicy::All => "all",
            SelectionPolicy::LatestTwoMinor => "latest_two_minor",
            SelectionPolicy::TwoMinorUpTo(_) => "two_minor_up_to",
            SelectionPolicy::Explicit(_) => "explicit",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::TwoMinorUpTo(anchor) => write!(f, "two_minor_up_to({anchor})"),
            SelectionPolicy::Explicit(versions) => write!(f, "explicit({})", versions.join(", ")),
            other => f.write_str(other.name()),
        }
    }
}

/// Lenient version parsing: a leading `v` is accepted and missing minor or
/// patch components default to zero (`v1.2` parses as `1.2.0`).
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    let split_at = body.find(['-', '+']).unwrap_or(body.len());
    let (core, suffix) = body.split_at(split_at);

    let mut numbers = Vec::with_capacity(3);
    for part in core.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        numbers.push(part.parse::<u64>().ok()?);
    }
    if numbers.is_empty() || numbers.len() > 3 {
        return None;
    }
    numbers.resize(3, 0);

    Version::parse(&format!(
        "{}.{}.{}{}",
        numbers[0], numbers[1], numbers[2], suffix
    ))
    .ok()
}

/// Parse every tag, dropping the ones that are not versions, and return
/// them ascending with duplicate tag names removed.
pub fn resolve_all(tags: &[Tag]) -> Vec<ResolvedVersion> {
    let mut resolved: Vec<ResolvedVersion> = tags
        .iter()
        .filter_map(|tag| match parse_version(&tag.name) {
            Some(version) => Some(ResolvedVersion::new(version, tag.clone())),
            None => {
                debug!(tag = %tag.name, "ignoring tag that is not a version");
                None
            }
        })
        .collect();
    resolved.sort();
    resolved.dedup_by(|a, b| a.original() == b.original());
    resolved
}

/// Apply `policy` to `tags`. The result is ascending and free of duplicates.
pub fn select(tags: &[Tag], policy: &SelectionPolicy) -> Result<Vec<ResolvedVersion>> {
    let resolved = resolve_all(tags);
    let Some(latest) = resolved.last().map(|v| v.version.clone()) else {
        return Err(TagforgeError::NoValidVersions {
            candidates: tags.len(),
        });
    };
    let candidates = resolved.len();

    let selected = match policy {
        SelectionPolicy::All => resolved,
        SelectionPolicy::LatestTwoMinor => {
            // Prereleases never anchor the window while a release exists.
            let anchor = resolved
                .iter()
                .rev()
                .find(|v| !v.is_prerelease())
                .map_or(latest, |v| v.version.clone());
            two_minor_window(resolved, &anchor)
        }
        SelectionPolicy::TwoMinorUpTo(anchor) => {
            let ceiling = parse_version(anchor).ok_or_else(|| TagforgeError::UnknownVersion {
                version: anchor.clone(),
            })?;
            two_minor_window(resolved, &ceiling)
        }
        SelectionPolicy::Explicit(requested) => pick_explicit(&resolved, requested)?,
    };

    obs::emit_versions_selected(policy.name(), candidates, selected.len());
    Ok(selected)
}

/// Versions in `[ceiling.major.(ceiling.minor - 1).0, ceiling]`. A prerelease
/// only qualifies when it is the ceiling itself.
fn two_minor_window(resolved: Vec<ResolvedVersion>, ceiling: &Version) -> Vec<ResolvedVersion> {
    let floor_minor = ceiling.minor.saturating_sub(1);
    resolved
        .into_iter()
        .filter(|v| {
            v.major() == ceiling.major
                && v.minor() >= floor_minor
                && v.version <= *ceiling
                && (!v.is_prerelease() || v.version == *ceiling)
        })
        .collect()
}

fn pick_explicit(resolved: &[ResolvedVersion], requested: &[String]) -> Result<Vec<ResolvedVersion>> {
    let mut picked = Vec::with_capacity(requested.len());
    for wanted in requested {
        let wanted = wanted.trim();
        let found = resolved
            .iter()
            .find(|v| v.original() == wanted)
            .ok_or_else(|| TagforgeError::UnknownVersion {
                version: wanted.to_string(),
            })?;
        picked.push(found.clone());
    }
    picked.sort();
    picked.dedup_by(|a, b| a.original() == b.original());
    Ok(picked)
}
