//! Monotone backend configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the monotone database is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbAccess {
    /// `automate stdio` against a database file on this host.
    Local,
    /// `automate remote_stdio` against a netsync-capable server.
    Remote,
}

/// Configuration for the monotone backend.
///
/// The two template fields substitute the project shortname for the
/// first `%s` occurrence, mirroring how deployments name one database
/// or netsync address per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonotoneConfig {
    /// Path to the monotone binary.
    pub mtn_path: String,
    /// Extra command-line options passed before the automate command.
    pub mtn_opts: Vec<String>,
    /// Whether to drive a local database or a remote server.
    pub db_access: DbAccess,
    /// Template for the local database path, e.g. `/var/mtn/%s.mtn`.
    pub repositories: String,
    /// Template for the remote address, e.g. `mtn://host/%s`. Also used
    /// to render access URLs; leave empty to disable both.
    pub remote_url: String,
    /// Per-project configuration key naming the master branch.
    pub master_branch_key: String,
}

impl Default for MonotoneConfig {
    fn default() -> Self {
        Self {
            mtn_path: "mtn".to_string(),
            mtn_opts: Vec::new(),
            db_access: DbAccess::Remote,
            repositories: String::new(),
            remote_url: String::new(),
            master_branch_key: "mtn_master_branch".to_string(),
        }
    }
}

impl MonotoneConfig {
    /// Path of the project's local database file.
    pub fn repository_path(&self, shortname: &str) -> PathBuf {
        PathBuf::from(self.repositories.replacen("%s", shortname, 1))
    }

    /// Netsync address of the project's remote database.
    pub fn remote_address(&self, shortname: &str) -> String {
        self.remote_url.replacen("%s", shortname, 1)
    }
}
