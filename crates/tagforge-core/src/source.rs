//! Upstream tag discovery.
//!
//! A [`RefLister`] produces the raw `<commit>\t<ref>` listing of a remote
//! (the format of `git ls-remote --tags`). [`TagSource`] turns that listing
//! into de-duplicated [`Tag`]s.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::deadline::with_deadline;
use crate::domain::Tag;
use crate::error::{Result, TagforgeError, TransportError};
use crate::obs;

/// Lists the tag refs of a remote repository.
#[async_trait]
pub trait RefLister: Send + Sync {
    /// Return one `<commit>\t<ref>` line per tag ref of `repository`.
    async fn list_tag_refs(&self, repository: &str) -> std::result::Result<String, TransportError>;
}

/// [`RefLister`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCliRefLister {
    git: PathBuf,
}

impl Default for GitCliRefLister {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliRefLister {
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }

    pub fn with_binary(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }
}

#[async_trait]
impl RefLister for GitCliRefLister {
    async fn list_tag_refs(&self, repository: &str) -> std::result::Result<String, TransportError> {
        let output = Command::new(&self.git)
            .args(["ls-remote", "--tags", repository])
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransportError::Io(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::failed(format!(
                "git ls-remote failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Trim trailing characters that are not digits, `.` or `v`, so peeled refs
/// like `1.0.0^{}` collapse onto `1.0.0`.
pub fn normalize_tag_name(name: &str) -> &str {
    name.trim_end_matches(|c: char| c != '.' && c != 'v' && !c.is_ascii_digit())
}

/// Parse a `<commit>\t<ref>` listing into tags.
///
/// Lines without a tab are skipped. The `refs/tags/` prefix is removed when
/// present. Duplicate names keep their first occurrence, order is otherwise
/// preserved.
pub fn parse_ref_listing(raw: &str, normalize_suffixes: bool) -> Vec<Tag> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((commit, reference)) = line.split_once('\t') else {
            debug!(line = %line, "skipping malformed ref line");
            continue;
        };

        let reference = reference.trim();
        let mut name = reference.strip_prefix("refs/tags/").unwrap_or(reference);
        if normalize_suffixes {
            name = normalize_tag_name(name);
        }
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            tags.push(Tag::new(name, commit.trim()));
        }
    }

    tags
}

/// Options for [`TagSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSourceOptions {
    pub normalize_suffixes: bool,
    /// Fail with [`TagforgeError::EmptyResult`] when the remote has no tags.
    pub require_tags: bool,
    pub timeout: Option<Duration>,
}

impl Default for TagSourceOptions {
    fn default() -> Self {
        Self {
            normalize_suffixes: true,
            require_tags: true,
            timeout: None,
        }
    }
}

/// Discovers the release tags of a repository.
pub struct TagSource {
    lister: Arc<dyn RefLister>,
    options: TagSourceOptions,
}

impl TagSource {
    pub fn new(lister: Arc<dyn RefLister>, options: TagSourceOptions) -> Self {
        Self { lister, options }
    }

    /// List the tags of `repository`.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<Tag>> {
        let raw = with_deadline(
            "git ls-remote",
            self.options.timeout,
            self.lister.list_tag_refs(repository),
        )
        .await
        .map_err(|cause| TagforgeError::SourceUnavailable {
            repository: repository.to_string(),
            cause,
        })?;

        let tags = parse_ref_listing(&raw, self.options.normalize_suffixes);
        if tags.is_empty() && self.options.require_tags {
            return Err(TagforgeError::EmptyResult {
                repository: repository.to_string(),
            });
        }

        obs::emit_tags_listed(repository, tags.len());
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingRefLister, StaticRefLister};
    use std::path::Path;
    use std::process::Command as StdCommand;

    const LISTING: &str = "\
1111111111111111111111111111111111111111\trefs/tags/1.0.0
2222222222222222222222222222222222222222\trefs/tags/1.0.0^{}
3333333333333333333333333333333333333333\trefs/tags/v1.1.0
4444444444444444444444444444444444444444\trefs/tags/1.2.0
";

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_peeled_refs_collapse_onto_tag() {
        let tags = parse_ref_listing(LISTING, true);
        assert_eq!(names(&tags), vec!["1.0.0", "v1.1.0", "1.2.0"]);
        assert_eq!(tags[0].commit, "1111111111111111111111111111111111111111");
    }

    #[test]
    fn test_without_normalization_peeled_refs_survive() {
        let tags = parse_ref_listing(LISTING, false);
        assert_eq!(names(&tags), vec!["1.0.0", "1.0.0^{}", "v1.1.0", "1.2.0"]);
    }

    #[test]
    fn test_malformed_and_blank_lines_skipped() {
        let raw = "not a ref line\n\nabc\trefs/tags/2.0.0\n";
        assert_eq!(names(&parse_ref_listing(raw, true)), vec!["2.0.0"]);
    }

    #[test]
    fn test_bare_names_accepted() {
        let raw = "abc\t1.0.0\ndef\t1.0.1\n";
        assert_eq!(names(&parse_ref_listing(raw, true)), vec!["1.0.0", "1.0.1"]);
    }

    #[test]
    fn test_normalize_tag_name() {
        assert_eq!(normalize_tag_name("1.0.0^{}"), "1.0.0");
        assert_eq!(normalize_tag_name("v2"), "v2");
        assert_eq!(normalize_tag_name("release"), "");
    }

    #[tokio::test]
    async fn test_list_tags_from_lister() {
        let source = TagSource::new(
            Arc::new(StaticRefLister::new(LISTING)),
            TagSourceOptions::default(),
        );
        let tags = source.list_tags("https://example.com/app.git").await.unwrap();
        assert_eq!(tags.len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_is_source_unavailable() {
        let source = TagSource::new(
            Arc::new(FailingRefLister::new(TransportError::failed("network down"))),
            TagSourceOptions::default(),
        );
        let err = source.list_tags("https://example.com/app.git").await.unwrap_err();
        assert!(matches!(
            err,
            TagforgeError::SourceUnavailable { ref repository, .. } if repository == "https://example.com/app.git"
        ));
    }

    #[tokio::test]
    async fn test_empty_listing_is_empty_result() {
        let source = TagSource::new(Arc::new(StaticRefLister::new("")), TagSourceOptions::default());
        let err = source.list_tags("repo").await.unwrap_err();
        assert!(matches!(err, TagforgeError::EmptyResult { .. }));
    }

    #[tokio::test]
    async fn test_empty_listing_allowed_when_not_required() {
        let options = TagSourceOptions {
            require_tags: false,
            ..TagSourceOptions::default()
        };
        let source = TagSource::new(Arc::new(StaticRefLister::new("")), options);
        assert!(source.list_tags("repo").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lister_times_out() {
        let options = TagSourceOptions {
            timeout: Some(Duration::from_secs(5)),
            ..TagSourceOptions::default()
        };
        let lister = StaticRefLister::new(LISTING).with_delay(Duration::from_secs(60));
        let source = TagSource::new(Arc::new(lister), options);

        let err = source.list_tags("repo").await.unwrap_err();
        match err {
            TagforgeError::SourceUnavailable { cause, .. } => assert!(cause.is_timeout()),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[tokio::test]
    async fn test_git_cli_lists_local_repository_tags() {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        run_git(dir.path(), &["tag", "1.0.0"]);
        run_git(dir.path(), &["tag", "-a", "1.1.0", "-m", "annotated"]);

        let source = TagSource::new(Arc::new(GitCliRefLister::new()), TagSourceOptions::default());
        let repository = dir.path().to_string_lossy().into_owned();
        let tags = source.list_tags(&repository).await.unwrap();

        let mut found = names(&tags);
        found.sort();
        assert_eq!(found, vec!["1.0.0", "1.1.0"]);
    }

    #[tokio::test]
    async fn test_git_cli_missing_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").to_string_lossy().into_owned();
        let source = TagSource::new(Arc::new(GitCliRefLister::new()), TagSourceOptions::default());
        let err = source.list_tags(&missing).await.unwrap_err();
        assert!(matches!(err, TagforgeError::SourceUnavailable { .. }));
    }
}
