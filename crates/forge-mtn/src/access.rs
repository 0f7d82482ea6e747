//! Access URLs and author resolution.

use crate::stdio::Transport;
use crate::{MonotoneClient, Result};
use forge_scm::{User, UserDirectory};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<?([^<> ]+@[^<> ]+)>?").expect("email regex"));

impl<T: Transport> MonotoneClient<T> {
    /// URL for anonymous pulls: the remote address with the branch to
    /// check out appended after `?`.
    ///
    /// The branch is the configured master branch, or the first branch
    /// certificate of `commit` when one resolves; revisions without a
    /// branch certificate fall back to the `*` wildcard. Empty when no
    /// remote URL template is configured.
    pub fn anonymous_access_url(&mut self, commit: Option<&str>) -> Result<String> {
        if self.config().remote_url.is_empty() {
            return Ok(String::new());
        }
        let branch = self.access_branch(commit)?;
        let address = self.config().remote_address(self.shortname());
        Ok(format!("{address}?{branch}"))
    }

    /// URL for authenticated pushes. Identical to the anonymous URL,
    /// except that `ssh://` remotes carry the user's login.
    pub fn auth_access_url(&mut self, user: &User, commit: Option<&str>) -> Result<String> {
        let url = self.anonymous_access_url(commit)?;
        match url.strip_prefix("ssh://") {
            Some(rest) => Ok(format!("ssh://{}@{rest}", user.login)),
            None => Ok(url),
        }
    }

    fn access_branch(&mut self, commit: Option<&str>) -> Result<String> {
        if let Some(commit) = commit {
            let revs = self.resolve_selector(commit)?;
            if let Some(rev) = revs.first().copied() {
                let certs = self.certs(&rev)?;
                return Ok(certs
                    .get("branch")
                    .and_then(|branches| branches.first())
                    .cloned()
                    .unwrap_or_else(|| "*".to_string()));
            }
        }
        self.main_branch()
    }
}

/// Resolves an author certificate value to a registered user.
///
/// Monotone author certificates usually carry a plain email address or
/// a `Name <email>` form; the contained address is looked up in the
/// directory by email first, then by login. Values without an address
/// resolve to nobody.
pub fn find_author(author: &str, directory: &dyn UserDirectory) -> Option<User> {
    let email = EMAIL_RE.captures(author)?.get(1)?.as_str();
    directory
        .find_by_email(email)
        .or_else(|| directory.find_by_login(email))
}
