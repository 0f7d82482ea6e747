//! Repository-level operations on top of the stdio transport.

use crate::basic_io::{self, Stanza};
use crate::stdio::{CommandOptions, StdioTransport, Transport};
use crate::{DbAccess, MonotoneConfig, MtnError, Result};
use chrono::NaiveDateTime;
use forge_scm::{
    Commit, FileEntry, FileKind, LastChange, LogEntry, Project, RevisionId, ScmBackend,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// The minimum automate interface version this client supports.
pub const MIN_INTERFACE_VERSION: f64 = 12.0;

/// A commit touching more files than this is considered large.
const LARGE_COMMIT_FILES: usize = 100;

/// Certificates of one revision: cert name to its ordered values.
pub type CertSet = BTreeMap<String, Vec<String>>;

/// A monotone repository client for one project.
///
/// Owns exactly one transport and drives it strictly one command at a
/// time. Certificate, branch and tag lookups are cached for the
/// client's lifetime without invalidation; revisions and their
/// certificates are immutable once committed, and callers needing
/// fresh branch or tag lists construct a new client. The caches are
/// unbounded, sized by the number of revisions visited.
pub struct MonotoneClient<T: Transport = StdioTransport> {
    config: MonotoneConfig,
    shortname: String,
    master_branch: Option<String>,
    transport: T,
    cert_cache: HashMap<RevisionId, CertSet>,
    branch_cache: Option<BTreeMap<String, String>>,
    tag_cache: Option<BTreeMap<RevisionId, String>>,
}

impl MonotoneClient<StdioTransport> {
    /// Creates a client for the project, backed by a subprocess
    /// transport. The subprocess is spawned on the first operation.
    pub fn open(project: &dyn Project, config: MonotoneConfig) -> Self {
        let transport = StdioTransport::new(config.clone(), project.shortname());
        Self::with_transport(project, config, transport)
    }
}

impl<T: Transport> MonotoneClient<T> {
    /// Creates a client over an existing transport. The configured
    /// master branch is captured from the project at construction.
    pub fn with_transport(project: &dyn Project, config: MonotoneConfig, transport: T) -> Self {
        let master_branch = project.config_value(&config.master_branch_key);
        Self {
            shortname: project.shortname().to_string(),
            master_branch,
            config,
            transport,
            cert_cache: HashMap::new(),
            branch_cache: None,
            tag_cache: None,
        }
    }

    /// The underlying transport, e.g. for out-of-band output.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The project's short identifier.
    pub fn shortname(&self) -> &str {
        &self.shortname
    }

    /// The backend configuration.
    pub fn config(&self) -> &MonotoneConfig {
        &self.config
    }

    /// Returns true if the backend is reachable and its automate
    /// interface is recent enough. Any protocol error maps to false.
    pub fn is_available(&mut self) -> bool {
        match self.exec_str(&["interface_version"]) {
            Ok(out) => out
                .trim()
                .parse::<f64>()
                .is_ok_and(|v| v >= MIN_INTERFACE_VERSION),
            Err(err) => {
                debug!(error = %err, "backend unavailable");
                false
            }
        }
    }

    /// Lists branches as a map from the `h:<name>` head selector to the
    /// branch name. Cached for the client's lifetime; mid-session
    /// branch creation is rare enough that staleness is accepted.
    pub fn branches(&mut self) -> Result<BTreeMap<String, String>> {
        if let Some(cached) = &self.branch_cache {
            return Ok(cached.clone());
        }
        let out = self.exec_str(&["branches"])?;
        let map: BTreeMap<String, String> = non_empty_lines(&out)
            .map(|b| (format!("h:{b}"), b.to_string()))
            .collect();
        self.branch_cache = Some(map.clone());
        Ok(map)
    }

    /// Returns the configured master branch, defaulting to the `*`
    /// wildcard, and verifies at least one revision resolves from it.
    ///
    /// Monotone has no inherent "main" branch; the choice is project
    /// configuration.
    pub fn main_branch(&mut self) -> Result<String> {
        let branch = self
            .master_branch
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "*".to_string());
        if self.resolve_selector(&format!("h:{branch}"))?.is_empty() {
            return Err(MtnError::EmptyBranch(branch));
        }
        Ok(branch)
    }

    /// Expands a selector or partial revision id to zero, one or many
    /// revision ids. Zero matches is an empty result, not an error.
    pub fn resolve_selector(&mut self, selector: &str) -> Result<Vec<RevisionId>> {
        let out = self.exec_str(&["select", selector])?;
        non_empty_lines(&out)
            .map(|line| RevisionId::from_hex(line).map_err(MtnError::from))
            .collect()
    }

    /// Returns true if the selector expands to exactly one revision.
    pub fn is_valid_revision(&mut self, selector: &str) -> Result<bool> {
        Ok(self.resolve_selector(selector)?.len() == 1)
    }

    /// Returns the certificates of a revision, memoized per revision
    /// for the client's lifetime.
    ///
    /// In the `certs` output a `name` line always precedes the `value`
    /// line of the same stanza; values accumulate under the most
    /// recently seen name.
    pub fn certs(&mut self, rev: &RevisionId) -> Result<CertSet> {
        if let Some(cached) = self.cert_cache.get(rev) {
            return Ok(cached.clone());
        }
        let out = self.exec_str(&["certs", &rev.to_hex()])?;
        let stanzas = basic_io::parse(&out)?;
        let mut certs = CertSet::new();
        for stanza in stanzas {
            let mut name: Option<String> = None;
            for line in stanza {
                match line.key.as_str() {
                    "name" => name = line.first_value().map(str::to_string),
                    "value" => {
                        if let (Some(name), Some(value)) = (&name, line.first_value()) {
                            certs.entry(name.clone()).or_default().push(value.to_string());
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        self.cert_cache.insert(*rev, certs.clone());
        Ok(certs)
    }

    /// Unions one certificate's values across several revisions,
    /// deduplicated in first-seen order.
    pub fn unique_cert_values(
        &mut self,
        revs: &[RevisionId],
        cert_name: &str,
    ) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for rev in revs {
            let certs = self.certs(rev)?;
            if let Some(cert_values) = certs.get(cert_name) {
                for value in cert_values {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    /// Branch names the commit appears on. Monotone has no path-scoped
    /// branch concept, so the path argument is ignored.
    pub fn in_branches(&mut self, commit: &str, _path: Option<&str>) -> Result<Vec<String>> {
        let revs = self.resolve_selector(commit)?;
        if revs.is_empty() {
            return Ok(Vec::new());
        }
        self.unique_cert_values(&revs, "branch")
    }

    /// Tag names attached to the commit. Path handling as in
    /// [`MonotoneClient::in_branches`].
    pub fn in_tags(&mut self, commit: &str, _path: Option<&str>) -> Result<Vec<String>> {
        let revs = self.resolve_selector(commit)?;
        if revs.is_empty() {
            return Ok(Vec::new());
        }
        self.unique_cert_values(&revs, "tag")
    }

    /// Lists tags as a map from revision id to tag name. Cached for
    /// the client's lifetime.
    pub fn tags(&mut self) -> Result<BTreeMap<RevisionId, String>> {
        if let Some(cached) = &self.tag_cache {
            return Ok(cached.clone());
        }
        let out = self.exec_str(&["tags"])?;
        let stanzas = basic_io::parse(&out)?;
        let mut tags = BTreeMap::new();
        for stanza in stanzas {
            let mut tag_name: Option<String> = None;
            for line in stanza {
                match line.key.as_str() {
                    // the revision line comes directly after the tag line
                    "tag" => tag_name = line.first_value().map(str::to_string),
                    "revision" => {
                        if let (Some(name), Some(hash)) = (&tag_name, line.hash()) {
                            tags.insert(RevisionId::from_hex(hash)?, name.clone());
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        self.tag_cache = Some(tags.clone());
        Ok(tags)
    }

    /// Returns the revision in which the file's content last changed,
    /// walking back from `start`.
    ///
    /// Only the first `content_mark` of the response is used; further
    /// marks occur in rare merge cases and are deliberately ignored,
    /// matching upstream behavior.
    pub fn last_change_for(
        &mut self,
        path: &str,
        start: &RevisionId,
    ) -> Result<Option<RevisionId>> {
        let out = self.exec_str(&["get_content_changed", &start.to_hex(), path])?;
        let stanzas = basic_io::parse(&out)?;
        for stanza in &stanzas {
            for line in stanza {
                if line.key == "content_mark" {
                    if let Some(hash) = line.hash() {
                        return Ok(Some(RevisionId::from_hex(hash)?));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Lists the entries directly below `folder` at the given commit:
    /// one path segment, not recursive. Files are enriched with size
    /// and, where history is on record, last-change metadata.
    pub fn tree(&mut self, commit: &str, folder: &str) -> Result<Vec<FileEntry>> {
        let revs = self.resolve_selector(commit)?;
        let Some(start) = revs.first().copied() else {
            return Ok(Vec::new());
        };
        let out = self.exec_str(&["get_manifest_of", &start.to_hex()])?;
        let stanzas = basic_io::parse(&out)?;

        let prefix = if folder.is_empty() || folder == "/" {
            String::new()
        } else {
            format!("{}/", folder.trim_end_matches('/'))
        };

        let mut entries = Vec::new();
        for stanza in &stanzas {
            let Some(first) = stanza.first() else { continue };
            if first.key == "format_version" {
                continue;
            }
            let Some(path) = first.first_value().map(str::to_string) else {
                continue;
            };
            let Some(name) = path.strip_prefix(&prefix).map(str::to_string) else {
                continue;
            };
            if name.is_empty() || name.contains('/') {
                continue;
            }
            entries.push(self.manifest_entry(stanza, &path, &name, &start)?);
        }
        Ok(entries)
    }

    /// Returns the entry at an exact path, or `None` if the manifest
    /// has no such path. The commit defaults to the main branch head.
    pub fn path_info(&mut self, path: &str, commit: Option<&str>) -> Result<Option<FileEntry>> {
        let selector = match commit {
            Some(commit) => commit.to_string(),
            None => format!("h:{}", self.main_branch()?),
        };
        let revs = self.resolve_selector(&selector)?;
        let Some(start) = revs.first().copied() else {
            return Ok(None);
        };
        let out = self.exec_str(&["get_manifest_of", &start.to_hex()])?;
        let stanzas = basic_io::parse(&out)?;

        for stanza in &stanzas {
            let Some(first) = stanza.first() else { continue };
            if first.key == "format_version" {
                continue;
            }
            if first.first_value() != Some(path) {
                continue;
            }
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            return self
                .manifest_entry(stanza, path, &name, &start)
                .map(Some);
        }
        Ok(None)
    }

    /// Fetches a file's content by its content hash.
    ///
    /// `command_only` fails unconditionally: there is no meaningful
    /// shell command to hand back for a stdio-driven backend.
    pub fn file(&mut self, entry: &FileEntry, command_only: bool) -> Result<Vec<u8>> {
        if command_only {
            return Err(MtnError::NotImplemented);
        }
        let hash = entry
            .hash
            .as_deref()
            .ok_or_else(|| MtnError::NotAFile(entry.full_path.clone()))?;
        self.file_by_hash(hash)
    }

    /// Unified diff of `target` against `source`, defaulting to the
    /// target's first parent (`p:<target>`). Empty when either side
    /// resolves to no revision, in particular when the target is a
    /// root revision without a parent.
    pub fn diff(&mut self, target: &str, source: Option<&str>) -> Result<String> {
        let source_selector = match source {
            Some(source) if !source.is_empty() => source.to_string(),
            _ => format!("p:{target}"),
        };
        let targets = self.resolve_selector(target)?;
        let sources = self.resolve_selector(&source_selector)?;
        let (Some(target_rev), Some(source_rev)) = (targets.first(), sources.first()) else {
            return Ok(String::new());
        };
        let options = CommandOptions::new()
            .with("r", source_rev.to_hex())
            .with("r", target_rev.to_hex());
        let out = self.transport.exec_with(&["content_diff"], &options)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Aggregates one commit's author, date and changelog certificates,
    /// optionally with its diff against the first parent. `None` when
    /// the selector matches nothing.
    pub fn commit(&mut self, commit: &str, with_diff: bool) -> Result<Option<Commit>> {
        let revs = self.resolve_selector(commit)?;
        let Some(rev) = revs.first().copied() else {
            return Ok(None);
        };
        let certs = self.certs(&rev)?;
        let changes = if with_diff {
            self.diff(&rev.to_hex(), None)?
        } else {
            String::new()
        };
        Ok(Some(Commit {
            commit: rev,
            author: joined_authors(&certs),
            date: joined_dates(&certs),
            title: combined_changelog(&certs),
            changes,
        }))
    }

    /// Heuristic: true when the commit patches or adds more than 100
    /// files. The threshold is fixed. The commit defaults to the main
    /// branch head; an unresolvable selector is not large.
    pub fn is_commit_large(&mut self, commit: Option<&str>) -> Result<bool> {
        let selector = match commit {
            Some(commit) if !commit.is_empty() => commit.to_string(),
            _ => format!("h:{}", self.main_branch()?),
        };
        let revs = self.resolve_selector(&selector)?;
        let Some(rev) = revs.first() else {
            return Ok(false);
        };
        let out = self.exec_str(&["get_revision", &rev.to_hex()])?;
        let stanzas = basic_io::parse(&out)?;
        let touched = stanzas
            .iter()
            .filter_map(|stanza| stanza.first())
            .filter(|line| line.key == "patch" || line.key == "add_file")
            .count();
        Ok(touched > LARGE_COMMIT_FILES)
    }

    /// Walks the revision graph backwards from `commit`, collecting at
    /// most `n` log entries.
    ///
    /// A frontier (horizon) of pending revisions is maintained; when it
    /// holds more than one member it is toposorted before popping, so
    /// ordering respects dependencies and is deterministic. The branch
    /// certificates of the first popped revision define the lineage:
    /// revisions whose branch set does not intersect it (unrelated
    /// merged-in branches) are expanded but not recorded.
    pub fn changelog(&mut self, commit: &str, n: usize) -> Result<Vec<LogEntry>> {
        let mut horizon: VecDeque<RevisionId> =
            self.resolve_selector(commit)?.into_iter().collect();
        let mut initial_branches: Vec<String> = Vec::new();
        let mut entries = Vec::new();

        while entries.len() < n {
            if horizon.len() > 1 {
                let hexes: Vec<String> = horizon.iter().map(RevisionId::to_hex).collect();
                let mut args = vec!["toposort"];
                args.extend(hexes.iter().map(String::as_str));
                let out = self.exec_str(&args)?;
                horizon = non_empty_lines(&out)
                    .map(|line| RevisionId::from_hex(line).map_err(MtnError::from))
                    .collect::<Result<VecDeque<_>>>()?;
            }
            let Some(rev) = horizon.pop_front() else {
                break;
            };

            let certs = self.certs(&rev)?;
            let branches = certs.get("branch").cloned().unwrap_or_default();
            if initial_branches.is_empty() {
                initial_branches = branches.clone();
            }
            if branches.iter().any(|b| initial_branches.contains(b)) {
                let combined = combined_changelog(&certs);
                let mut parts = combined.splitn(2, |c| c == '\n' || c == '\r');
                let title = parts.next().unwrap_or("").to_string();
                let full_message = parts.next().unwrap_or("").trim().to_string();
                entries.push(LogEntry {
                    commit: rev,
                    author: joined_authors(&certs),
                    date: joined_dates(&certs),
                    title,
                    full_message,
                });
            }

            let out = self.exec_str(&["parents", &rev.to_hex()])?;
            for line in non_empty_lines(&out) {
                let parent = RevisionId::from_hex(line)?;
                if !horizon.contains(&parent) {
                    horizon.push_back(parent);
                }
            }
        }
        Ok(entries)
    }

    /// Size of the local database file in bytes; zero when the file is
    /// missing or the database is remote.
    pub fn repository_size(&self) -> u64 {
        match self.config.db_access {
            DbAccess::Local => {
                std::fs::metadata(self.config.repository_path(&self.shortname))
                    .map(|m| m.len())
                    .unwrap_or(0)
            }
            DbAccess::Remote => 0,
        }
    }

    fn manifest_entry(
        &mut self,
        stanza: &Stanza,
        full_path: &str,
        name: &str,
        start: &RevisionId,
    ) -> Result<FileEntry> {
        let is_dir = stanza.first().is_some_and(|line| line.key == "dir");
        let (kind, hash, size) = if is_dir {
            (FileKind::Tree, None, 0)
        } else {
            let hash = stanza
                .iter()
                .find(|line| line.key == "content")
                .and_then(|line| line.hash())
                .map(str::to_string)
                .ok_or_else(|| {
                    MtnError::Protocol(format!(
                        "manifest entry '{full_path}' has no content hash"
                    ))
                })?;
            let size = self.file_by_hash(&hash)?.len() as u64;
            (FileKind::Blob, Some(hash), size)
        };

        let last_change = match self.last_change_for(full_path, start)? {
            Some(rev) => {
                let certs = self.certs(&rev)?;
                Some(LastChange {
                    revision: rev,
                    author: joined_authors(&certs),
                    date: joined_dates(&certs),
                    log: combined_changelog(&certs),
                })
            }
            None => None,
        };

        Ok(FileEntry {
            name: name.to_string(),
            full_path: full_path.to_string(),
            kind,
            hash,
            size,
            last_change,
        })
    }

    fn file_by_hash(&mut self, hash: &str) -> Result<Vec<u8>> {
        self.transport.exec(&["get_file", hash])
    }

    fn exec_str(&mut self, args: &[&str]) -> Result<String> {
        let out = self.transport.exec(args)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl<T: Transport> ScmBackend for MonotoneClient<T> {
    type Error = MtnError;

    fn is_available(&mut self) -> bool {
        MonotoneClient::is_available(self)
    }

    fn branches(&mut self) -> Result<BTreeMap<String, String>> {
        MonotoneClient::branches(self)
    }

    fn main_branch(&mut self) -> Result<String> {
        MonotoneClient::main_branch(self)
    }

    fn resolve_revision(&mut self, selector: &str) -> Result<Vec<RevisionId>> {
        self.resolve_selector(selector)
    }

    fn is_valid_revision(&mut self, selector: &str) -> Result<bool> {
        MonotoneClient::is_valid_revision(self, selector)
    }

    fn tags(&mut self) -> Result<BTreeMap<RevisionId, String>> {
        MonotoneClient::tags(self)
    }

    fn in_branches(&mut self, commit: &str, path: Option<&str>) -> Result<Vec<String>> {
        MonotoneClient::in_branches(self, commit, path)
    }

    fn in_tags(&mut self, commit: &str, path: Option<&str>) -> Result<Vec<String>> {
        MonotoneClient::in_tags(self, commit, path)
    }

    fn tree(&mut self, commit: &str, folder: &str) -> Result<Vec<FileEntry>> {
        MonotoneClient::tree(self, commit, folder)
    }

    fn path_info(&mut self, path: &str, commit: Option<&str>) -> Result<Option<FileEntry>> {
        MonotoneClient::path_info(self, path, commit)
    }

    fn file(&mut self, entry: &FileEntry, command_only: bool) -> Result<Vec<u8>> {
        MonotoneClient::file(self, entry, command_only)
    }

    fn diff(&mut self, target: &str, source: Option<&str>) -> Result<String> {
        MonotoneClient::diff(self, target, source)
    }

    fn commit(&mut self, commit: &str, with_diff: bool) -> Result<Option<Commit>> {
        MonotoneClient::commit(self, commit, with_diff)
    }

    fn is_commit_large(&mut self, commit: Option<&str>) -> Result<bool> {
        MonotoneClient::is_commit_large(self, commit)
    }

    fn changelog(&mut self, commit: &str, n: usize) -> Result<Vec<LogEntry>> {
        MonotoneClient::changelog(self, commit, n)
    }
}

fn non_empty_lines(out: &str) -> impl Iterator<Item = &str> {
    out.lines().filter(|line| !line.is_empty())
}

fn joined_authors(certs: &CertSet) -> String {
    certs
        .get("author")
        .map(|values| values.join(", "))
        .unwrap_or_default()
}

fn joined_dates(certs: &CertSet) -> String {
    certs
        .get("date")
        .map(|values| {
            values
                .iter()
                .map(|date| format_cert_date(date))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn combined_changelog(certs: &CertSet) -> String {
    certs
        .get("changelog")
        .map(|values| values.join("\n---\n"))
        .unwrap_or_default()
}

/// Normalizes a date certificate from monotone's ISO-8601 `T` form to
/// `YYYY-MM-DD HH:MM:SS`; values that do not parse pass through.
fn format_cert_date(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdio::OutOfBand;
    use forge_scm::StaticProject;
    use pretty_assertions::assert_eq;

    const REV_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const REV_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const REV_C: &str = "cccccccccccccccccccccccccccccccccccccccc";
    const FILE_HASH: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    const KEY_HASH: &str = "1234567890123456789012345678901234567890";

    #[derive(Default)]
    struct StubTransport {
        responses: HashMap<String, String>,
        calls: Vec<String>,
        oob: OutOfBand,
    }

    impl StubTransport {
        fn respond(mut self, command: &str, output: &str) -> Self {
            self.responses.insert(command.to_string(), output.to_string());
            self
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl Transport for StubTransport {
        fn exec_with(&mut self, args: &[&str], _options: &CommandOptions) -> Result<Vec<u8>> {
            let command = args.join(" ");
            self.calls.push(command.clone());
            match self.responses.get(&command) {
                Some(output) => Ok(output.clone().into_bytes()),
                None => Err(MtnError::Command {
                    code: 1,
                    command,
                    oob_errors: "no match for selection".to_string(),
                }),
            }
        }

        fn out_of_band(&self) -> &OutOfBand {
            &self.oob
        }
    }

    fn client(stub: StubTransport) -> MonotoneClient<StubTransport> {
        let project = StaticProject::new("test");
        MonotoneClient::with_transport(&project, MonotoneConfig::default(), stub)
    }

    fn client_with_master(stub: StubTransport, branch: &str) -> MonotoneClient<StubTransport> {
        let project = StaticProject::new("test").with_value("mtn_master_branch", branch);
        MonotoneClient::with_transport(&project, MonotoneConfig::default(), stub)
    }

    fn cert_stanza(name: &str, value: &str) -> String {
        format!(
            "      key [{KEY_HASH}]\nsignature \"ok\"\n     name \"{name}\"\n    value \"{value}\"\n    trust \"trusted\"\n"
        )
    }

    fn certs_fixture(certs: &[(&str, &str)]) -> String {
        certs
            .iter()
            .map(|(name, value)| cert_stanza(name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn branches_maps_head_selector_to_name() {
        let stub = StubTransport::default().respond("branches", "testbranch\n");
        let mut client = client(stub);
        let branches = client.branches().unwrap();
        assert_eq!(
            branches,
            BTreeMap::from([("h:testbranch".to_string(), "testbranch".to_string())])
        );
    }

    #[test]
    fn branches_are_cached() {
        let stub = StubTransport::default().respond("branches", "one\ntwo\n");
        let mut client = client(stub);
        let first = client.branches().unwrap();
        let second = client.branches().unwrap();
        assert_eq!(first, second);
        assert_eq!(client.transport().count("branches"), 1);
    }

    #[test]
    fn resolve_selector_with_no_match_is_empty() {
        let stub = StubTransport::default().respond("select z:none", "");
        let mut client = client(stub);
        assert_eq!(client.resolve_selector("z:none").unwrap(), vec![]);
    }

    #[test]
    fn resolve_selector_returns_all_matches() {
        let stub = StubTransport::default().respond("select h:*", &format!("{REV_A}\n{REV_B}\n"));
        let mut client = client(stub);
        let revs = client.resolve_selector("h:*").unwrap();
        assert_eq!(
            revs,
            vec![
                RevisionId::from_hex(REV_A).unwrap(),
                RevisionId::from_hex(REV_B).unwrap(),
            ]
        );
    }

    #[test]
    fn is_valid_revision_requires_exactly_one_match() {
        let stub = StubTransport::default()
            .respond("select one", &format!("{REV_A}\n"))
            .respond("select many", &format!("{REV_A}\n{REV_B}\n"))
            .respond("select none", "");
        let mut client = client(stub);
        assert!(client.is_valid_revision("one").unwrap());
        assert!(!client.is_valid_revision("many").unwrap());
        assert!(!client.is_valid_revision("none").unwrap());
    }

    #[test]
    fn is_available_checks_interface_version() {
        let mut client = client(StubTransport::default().respond("interface_version", "13.1\n"));
        assert!(client.is_available());

        let mut client = client_with_master(
            StubTransport::default().respond("interface_version", "11.0\n"),
            "main",
        );
        assert!(!client.is_available());
    }

    #[test]
    fn is_available_swallows_protocol_errors() {
        let mut client = client(StubTransport::default());
        assert!(!client.is_available());
    }

    #[test]
    fn certs_group_values_under_preceding_name() {
        let fixture = certs_fixture(&[
            ("author", "joe@example.com"),
            ("branch", "com.example.main"),
            ("changelog", "initial import"),
        ]);
        let stub = StubTransport::default().respond(&format!("certs {REV_A}"), &fixture);
        let mut client = client(stub);
        let certs = client.certs(&RevisionId::from_hex(REV_A).unwrap()).unwrap();
        assert_eq!(certs["author"], vec!["joe@example.com".to_string()]);
        assert_eq!(certs["branch"], vec!["com.example.main".to_string()]);
    }

    #[test]
    fn certs_are_cached_per_revision() {
        let fixture = certs_fixture(&[("author", "joe@example.com")]);
        let stub = StubTransport::default().respond(&format!("certs {REV_A}"), &fixture);
        let mut client = client(stub);
        let rev = RevisionId::from_hex(REV_A).unwrap();
        let first = client.certs(&rev).unwrap();
        let second = client.certs(&rev).unwrap();
        assert_eq!(first, second);
        assert_eq!(client.transport().count("certs"), 1);
    }

    #[test]
    fn unique_cert_values_deduplicate_across_revisions() {
        let stub = StubTransport::default()
            .respond(
                &format!("certs {REV_A}"),
                &certs_fixture(&[("branch", "main"), ("branch", "feature")]),
            )
            .respond(&format!("certs {REV_B}"), &certs_fixture(&[("branch", "main")]));
        let mut client = client(stub);
        let revs = vec![
            RevisionId::from_hex(REV_A).unwrap(),
            RevisionId::from_hex(REV_B).unwrap(),
        ];
        let values = client.unique_cert_values(&revs, "branch").unwrap();
        assert_eq!(values, vec!["main".to_string(), "feature".to_string()]);
    }

    #[test]
    fn in_branches_collects_branch_certs() {
        let stub = StubTransport::default()
            .respond("select t:1.0", &format!("{REV_A}\n"))
            .respond(
                &format!("certs {REV_A}"),
                &certs_fixture(&[("branch", "com.example.main")]),
            );
        let mut client = client(stub);
        assert_eq!(
            client.in_branches("t:1.0", None).unwrap(),
            vec!["com.example.main".to_string()]
        );
    }

    #[test]
    fn in_branches_of_unresolved_commit_is_empty() {
        let stub = StubTransport::default().respond("select nothing", "");
        let mut client = client(stub);
        assert_eq!(client.in_branches("nothing", None).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn tags_map_revision_to_name() {
        let fixture = format!(
            "format_version \"1\"\n\n     tag \"release-1.0\"\nrevision [{REV_A}]\n  signer \"joe@example.com\"\n"
        );
        let stub = StubTransport::default().respond("tags", &fixture);
        let mut client = client(stub);
        let tags = client.tags().unwrap();
        assert_eq!(
            tags,
            BTreeMap::from([(RevisionId::from_hex(REV_A).unwrap(), "release-1.0".to_string())])
        );
        // cached
        client.tags().unwrap();
        assert_eq!(client.transport().count("tags"), 1);
    }

    #[test]
    fn main_branch_defaults_to_wildcard() {
        let stub = StubTransport::default().respond("select h:*", &format!("{REV_A}\n"));
        let mut client = client(stub);
        assert_eq!(client.main_branch().unwrap(), "*");
    }

    #[test]
    fn main_branch_fails_when_branch_is_empty() {
        let stub = StubTransport::default().respond("select h:dead.branch", "");
        let mut client = client_with_master(stub, "dead.branch");
        assert!(matches!(
            client.main_branch(),
            Err(MtnError::EmptyBranch(branch)) if branch == "dead.branch"
        ));
    }

    #[test]
    fn diff_of_root_revision_is_empty_without_wire_call() {
        let stub = StubTransport::default()
            .respond("select X", &format!("{REV_A}\n"))
            .respond("select p:X", "\n");
        let mut client = client(stub);
        assert_eq!(client.diff("X", None).unwrap(), "");
        assert_eq!(client.transport().count("content_diff"), 0);
    }

    #[test]
    fn diff_runs_content_diff_between_resolved_revisions() {
        let stub = StubTransport::default()
            .respond("select X", &format!("{REV_A}\n"))
            .respond("select p:X", &format!("{REV_B}\n"))
            .respond("content_diff", "--- old\n+++ new\n");
        let mut client = client(stub);
        assert_eq!(client.diff("X", None).unwrap(), "--- old\n+++ new\n");
        assert_eq!(client.transport().count("content_diff"), 1);
    }

    #[test]
    fn commit_aggregates_certificates() {
        let fixture = certs_fixture(&[
            ("author", "joe@example.com"),
            ("date", "2011-03-19T13:59:47"),
            ("changelog", "fix the frobnicator"),
        ]);
        let stub = StubTransport::default()
            .respond(&format!("select {REV_A}"), &format!("{REV_A}\n"))
            .respond(&format!("certs {REV_A}"), &fixture);
        let mut client = client(stub);
        let commit = client.commit(REV_A, false).unwrap().unwrap();
        assert_eq!(commit.author, "joe@example.com");
        assert_eq!(commit.date, "2011-03-19 13:59:47");
        assert_eq!(commit.title, "fix the frobnicator");
        assert_eq!(commit.changes, "");
        assert_eq!(commit.commit, RevisionId::from_hex(REV_A).unwrap());
    }

    #[test]
    fn commit_of_unresolved_selector_is_none() {
        let stub = StubTransport::default().respond("select gone", "");
        let mut client = client(stub);
        assert_eq!(client.commit("gone", false).unwrap(), None);
    }

    fn revision_fixture(patches: usize) -> String {
        let mut out = String::from("format_version \"1\"\n\nnew_manifest [da39a3ee5e6b4b0d3255bfef95601890afd80709]\n");
        for i in 0..patches {
            out.push_str(&format!(
                "\npatch \"file-{i}\"\n from [{FILE_HASH}]\n   to [{FILE_HASH}]\n"
            ));
        }
        out
    }

    #[test]
    fn commit_is_large_strictly_above_threshold() {
        let stub = StubTransport::default()
            .respond("select at", &format!("{REV_A}\n"))
            .respond("select above", &format!("{REV_B}\n"))
            .respond(&format!("get_revision {REV_A}"), &revision_fixture(100))
            .respond(&format!("get_revision {REV_B}"), &revision_fixture(101));
        let mut client = client(stub);
        assert!(!client.is_commit_large(Some("at")).unwrap());
        assert!(client.is_commit_large(Some("above")).unwrap());
    }

    #[test]
    fn changelog_follows_initial_branches_only() {
        let stub = StubTransport::default()
            .respond("select h:main", &format!("{REV_A}\n"))
            .respond(&format!("certs {REV_A}"), &certs_fixture(&[
                ("branch", "main"),
                ("author", "joe@example.com"),
                ("date", "2011-03-19T13:59:47"),
                ("changelog", "tip commit\n\ndetails here"),
            ]))
            .respond(&format!("parents {REV_A}"), &format!("{REV_B}\n{REV_C}\n"))
            .respond(&format!("toposort {REV_B} {REV_C}"), &format!("{REV_B}\n{REV_C}\n"))
            .respond(&format!("certs {REV_B}"), &certs_fixture(&[
                ("branch", "main"),
                ("author", "ann@example.com"),
                ("changelog", "older commit"),
            ]))
            .respond(&format!("parents {REV_B}"), "")
            .respond(&format!("certs {REV_C}"), &certs_fixture(&[
                ("branch", "feature"),
                ("author", "bob@example.com"),
                ("changelog", "merged-in side branch"),
            ]))
            .respond(&format!("parents {REV_C}"), "");
        let mut client = client(stub);
        let entries = client.changelog("h:main", 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].commit, RevisionId::from_hex(REV_A).unwrap());
        assert_eq!(entries[0].title, "tip commit");
        assert_eq!(entries[0].full_message, "details here");
        assert_eq!(entries[1].commit, RevisionId::from_hex(REV_B).unwrap());
        assert_eq!(entries[1].full_message, "");
    }

    #[test]
    fn changelog_never_exceeds_requested_length() {
        let stub = StubTransport::default()
            .respond("select h:main", &format!("{REV_A}\n"))
            .respond(&format!("certs {REV_A}"), &certs_fixture(&[
                ("branch", "main"),
                ("changelog", "tip commit"),
            ]))
            .respond(&format!("parents {REV_A}"), &format!("{REV_B}\n"))
            .respond(&format!("certs {REV_B}"), &certs_fixture(&[
                ("branch", "main"),
                ("changelog", "older commit"),
            ]))
            .respond(&format!("parents {REV_B}"), "");
        let mut client = client(stub);
        let entries = client.changelog("h:main", 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "tip commit");
    }

    fn manifest_fixture() -> String {
        format!(
            "format_version \"1\"\n\ndir \"\"\n\ndir \"src\"\n\nfile \"README\"\ncontent [{FILE_HASH}]\n\nfile \"src/main.c\"\ncontent [{FILE_HASH}]\n"
        )
    }

    fn tree_stub() -> StubTransport {
        StubTransport::default()
            .respond("select h:main", &format!("{REV_A}\n"))
            .respond(&format!("get_manifest_of {REV_A}"), &manifest_fixture())
            .respond(&format!("get_file {FILE_HASH}"), "hello\n")
            .respond(&format!("get_content_changed {REV_A} README"), &format!("content_mark [{REV_B}]\n"))
            .respond(&format!("get_content_changed {REV_A} src"), "")
            .respond(&format!("get_content_changed {REV_A} src/main.c"), "")
            .respond(&format!("certs {REV_B}"), &certs_fixture(&[
                ("author", "joe@example.com"),
                ("date", "2011-03-19T13:59:47"),
                ("changelog", "initial import"),
            ]))
    }

    #[test]
    fn tree_lists_direct_children_only() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "/").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "README"]);
        assert!(entries[0].is_tree());
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[1].kind, FileKind::Blob);
        assert_eq!(entries[1].size, 6);
        assert_eq!(entries[1].hash.as_deref(), Some(FILE_HASH));
    }

    #[test]
    fn tree_enriches_blobs_with_last_change() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "/").unwrap();
        let readme = &entries[1];
        let last = readme.last_change.as_ref().unwrap();
        assert_eq!(last.revision, RevisionId::from_hex(REV_B).unwrap());
        assert_eq!(last.author, "joe@example.com");
        assert_eq!(last.date, "2011-03-19 13:59:47");
        assert_eq!(last.log, "initial import");
    }

    #[test]
    fn tree_tolerates_missing_history() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "src").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "main.c");
        assert_eq!(entries[0].full_path, "src/main.c");
        assert!(entries[0].last_change.is_none());
    }

    #[test]
    fn tree_of_unresolved_commit_is_empty() {
        let stub = StubTransport::default().respond("select h:gone", "");
        let mut client = client(stub);
        assert_eq!(client.tree("h:gone", "/").unwrap(), vec![]);
    }

    #[test]
    fn path_info_finds_exact_path() {
        let mut client = client(tree_stub());
        let entry = client.path_info("src/main.c", Some("h:main")).unwrap().unwrap();
        assert_eq!(entry.name, "main.c");
        assert_eq!(entry.kind, FileKind::Blob);
    }

    #[test]
    fn path_info_of_missing_path_is_none() {
        let mut client = client(tree_stub());
        assert_eq!(client.path_info("nonexistent", Some("h:main")).unwrap(), None);
    }

    #[test]
    fn file_fetches_content_by_hash() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "src").unwrap();
        let content = client.file(&entries[0], false).unwrap();
        assert_eq!(content, b"hello\n");
    }

    #[test]
    fn file_command_only_is_not_implemented() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "src").unwrap();
        assert!(matches!(
            client.file(&entries[0], true),
            Err(MtnError::NotImplemented)
        ));
    }

    #[test]
    fn file_of_directory_fails() {
        let mut client = client(tree_stub());
        let entries = client.tree("h:main", "/").unwrap();
        assert!(entries[0].is_tree());
        assert!(matches!(
            client.file(&entries[0], false),
            Err(MtnError::NotAFile(_))
        ));
    }

    #[test]
    fn repository_size_reads_local_database_file() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.mtn");
        let mut f = std::fs::File::create(&db).unwrap();
        f.write_all(b"0123456789").unwrap();

        let config = MonotoneConfig {
            db_access: DbAccess::Local,
            repositories: dir
                .path()
                .join("%s.mtn")
                .to_string_lossy()
                .into_owned(),
            ..MonotoneConfig::default()
        };
        let project = StaticProject::new("test");
        let client: MonotoneClient<StubTransport> =
            MonotoneClient::with_transport(&project, config, StubTransport::default());
        assert_eq!(client.repository_size(), 10);
    }

    #[test]
    fn repository_size_of_remote_database_is_zero() {
        let client = client(StubTransport::default());
        assert_eq!(client.repository_size(), 0);
    }

    #[test]
    fn cert_dates_fall_through_when_unparsable() {
        assert_eq!(format_cert_date("2011-03-19T13:59:47"), "2011-03-19 13:59:47");
        assert_eq!(format_cert_date("not a date"), "not a date");
    }
}
