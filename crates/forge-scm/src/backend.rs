//! The SCM backend capability trait and user-directory collaborator.

use crate::{Commit, FileEntry, LogEntry, RevisionId};
use std::collections::BTreeMap;

/// A local user account, as resolved from commit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Login name.
    pub login: String,
    /// Primary e-mail address.
    pub email: String,
}

/// Read-only lookup into the hosting application's user store.
pub trait UserDirectory {
    /// Finds a user by e-mail address.
    fn find_by_email(&self, email: &str) -> Option<User>;

    /// Finds a user by login name.
    fn find_by_login(&self, login: &str) -> Option<User>;
}

/// The capability set every SCM backend implements.
///
/// Operations take `&mut self` because backends may drive a stateful
/// subprocess and maintain per-client caches. Commit arguments are
/// backend-specific selector strings; callers must be prepared for a
/// selector to expand to zero, one, or many revisions.
pub trait ScmBackend {
    /// The backend's error type.
    type Error;

    /// Returns true if the backend is reachable and speaks a supported
    /// interface version. Never fails; any protocol error maps to false.
    fn is_available(&mut self) -> bool;

    /// Lists branches as a map from a branch selector to the branch name.
    fn branches(&mut self) -> Result<BTreeMap<String, String>, Self::Error>;

    /// Returns the configured main branch, verifying it is non-empty.
    fn main_branch(&mut self) -> Result<String, Self::Error>;

    /// Expands a selector to zero, one, or many revision ids.
    fn resolve_revision(&mut self, selector: &str) -> Result<Vec<RevisionId>, Self::Error>;

    /// Returns true if the selector expands to exactly one revision.
    fn is_valid_revision(&mut self, selector: &str) -> Result<bool, Self::Error>;

    /// Lists tags as a map from revision id to tag name.
    fn tags(&mut self) -> Result<BTreeMap<RevisionId, String>, Self::Error>;

    /// Branch names the commit appears on. The path argument is accepted
    /// for interface parity; backends without path-scoped branches ignore it.
    fn in_branches(&mut self, commit: &str, path: Option<&str>)
        -> Result<Vec<String>, Self::Error>;

    /// Tag names attached to the commit. Path handling as in
    /// [`ScmBackend::in_branches`].
    fn in_tags(&mut self, commit: &str, path: Option<&str>) -> Result<Vec<String>, Self::Error>;

    /// Lists the entries directly below `folder` at the given commit.
    fn tree(&mut self, commit: &str, folder: &str) -> Result<Vec<FileEntry>, Self::Error>;

    /// Returns the entry at an exact path, or `None` if absent.
    fn path_info(
        &mut self,
        path: &str,
        commit: Option<&str>,
    ) -> Result<Option<FileEntry>, Self::Error>;

    /// Fetches a file's content. With `command_only` the backend returns
    /// the shell command it would run instead of executing it; backends
    /// without a meaningful command fail.
    fn file(&mut self, entry: &FileEntry, command_only: bool) -> Result<Vec<u8>, Self::Error>;

    /// Unified diff of `target` against `source`, defaulting to the
    /// target's first parent. Empty when either side has no revision.
    fn diff(&mut self, target: &str, source: Option<&str>) -> Result<String, Self::Error>;

    /// Aggregates one commit's metadata, optionally with its diff.
    fn commit(&mut self, commit: &str, with_diff: bool)
        -> Result<Option<Commit>, Self::Error>;

    /// Heuristic: does the commit touch an unusually large number of files?
    fn is_commit_large(&mut self, commit: Option<&str>) -> Result<bool, Self::Error>;

    /// Walks the history backwards from `commit`, returning at most `n`
    /// entries confined to the starting revision's branch lineage.
    fn changelog(&mut self, commit: &str, n: usize) -> Result<Vec<LogEntry>, Self::Error>;
}
