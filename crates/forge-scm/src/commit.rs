//! Record types returned by SCM operations.

use crate::RevisionId;
use serde::{Deserialize, Serialize};

/// A single commit, aggregated from the backend's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The revision this record describes.
    pub commit: RevisionId,
    /// Author(s), comma separated when a revision carries several.
    pub author: String,
    /// Commit date(s), normalized to `YYYY-MM-DD HH:MM:SS` UTC.
    pub date: String,
    /// The full commit message.
    pub title: String,
    /// Unified diff against the first parent, empty unless requested.
    pub changes: String,
}

/// One entry of a change log traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The revision this record describes.
    pub commit: RevisionId,
    /// Author(s), comma separated.
    pub author: String,
    /// Commit date(s), normalized to `YYYY-MM-DD HH:MM:SS` UTC.
    pub date: String,
    /// First line of the commit message.
    pub title: String,
    /// Remainder of the commit message, trimmed; may be empty.
    pub full_message: String,
}

/// Classification of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A directory.
    Tree,
    /// A regular file.
    Blob,
}

/// Metadata about the revision that last touched a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastChange {
    /// The last revision that changed the file's content.
    pub revision: RevisionId,
    /// Author(s) of that revision.
    pub author: String,
    /// Date(s) of that revision.
    pub date: String,
    /// Commit message(s) of that revision.
    pub log: String,
}

/// One entry of a tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File or directory name, without the leading path.
    pub name: String,
    /// Full path from the repository root.
    pub full_path: String,
    /// Whether this is a directory or a file.
    pub kind: FileKind,
    /// Content hash for files; directories have none.
    pub hash: Option<String>,
    /// Content size in bytes; zero for directories.
    pub size: u64,
    /// History enrichment; omitted when the backend has none on record.
    pub last_change: Option<LastChange>,
}

impl FileEntry {
    /// Returns true if the entry is a directory.
    pub fn is_tree(&self) -> bool {
        self.kind == FileKind::Tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FileKind::Tree).unwrap(), "\"tree\"");
        assert_eq!(serde_json::to_string(&FileKind::Blob).unwrap(), "\"blob\"");
    }

    #[test]
    fn file_entry_is_tree() {
        let entry = FileEntry {
            name: "src".into(),
            full_path: "src".into(),
            kind: FileKind::Tree,
            hash: None,
            size: 0,
            last_change: None,
        };
        assert!(entry.is_tree());
    }
}
