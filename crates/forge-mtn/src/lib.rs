//! Monotone backend: a client for the `automate stdio` interface.
//!
//! The crate drives a long-lived `mtn automate stdio` (or
//! `automate remote_stdio`) subprocess over its length-prefixed chunk
//! protocol, parses the basic_io stanza output of the automate
//! commands, and exposes repository browsing operations behind the
//! [`forge_scm::ScmBackend`] trait.
//!
//! # Example
//!
//! ```no_run
//! use forge_mtn::{MonotoneClient, MonotoneConfig, DbAccess};
//! use forge_scm::StaticProject;
//!
//! let config = MonotoneConfig {
//!     db_access: DbAccess::Local,
//!     repositories: "/var/mtn/%s.mtn".to_string(),
//!     ..MonotoneConfig::default()
//! };
//! let project = StaticProject::new("hello");
//! let mut client = MonotoneClient::open(&project, config);
//! if client.is_available() {
//!     for (selector, branch) in client.branches().unwrap() {
//!         println!("{selector} -> {branch}");
//!     }
//! }
//! ```

pub mod access;
pub mod basic_io;
mod client;
mod config;
mod error;
pub mod stdio;

pub use access::find_author;
pub use client::{CertSet, MonotoneClient, MIN_INTERFACE_VERSION};
pub use config::{DbAccess, MonotoneConfig};
pub use error::{MtnError, Result};
pub use stdio::{CommandOptions, OutOfBand, StdioTransport, Transport, STDIO_VERSION};
