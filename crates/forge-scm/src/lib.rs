//! Common SCM surface for Forge.
//!
//! This crate defines what every SCM backend shares: the revision
//! identifier, the record types an operation returns (commits, log
//! entries, tree entries), the collaborator traits through which a
//! backend reaches the hosting application (project configuration,
//! user directory), and the [`ScmBackend`] capability trait itself.
//! Backend implementations live in their own crates.

mod backend;
mod commit;
mod project;
mod revision;

pub use backend::{ScmBackend, User, UserDirectory};
pub use commit::{Commit, FileEntry, FileKind, LastChange, LogEntry};
pub use project::{Project, StaticProject};
pub use revision::{InvalidRevisionId, RevisionId};
