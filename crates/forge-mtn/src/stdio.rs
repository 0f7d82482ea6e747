//! The monotone `automate stdio` transport.
//!
//! Owns one monotone subprocess and implements the stdio framing
//! protocol on its pipes: commands go out as length-prefixed argument
//! (and option) blocks, responses come back as a stream of
//! `<cmdnum>:<channel>:<len>:<payload>` chunks multiplexing main
//! output with four out-of-band channels. The protocol is strictly
//! request/response with one command in flight; every response chunk
//! must echo the running command counter, and a mismatch leaves the
//! transport unusable until it is restarted.

use crate::{DbAccess, MonotoneConfig, MtnError, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

/// The single stdio protocol version this client speaks. Monotone
/// versions prior to 0.47 do not announce one and are incompatible.
pub const STDIO_VERSION: u32 = 2;

/// Options passed alongside a stdio command.
///
/// A key may repeat with several values (e.g. `r` carrying both
/// revisions of a diff); insertion order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pairs: Vec<(String, String)>,
}

impl CommandOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one key/value pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Appends one key/value pair, returning the set for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Returns true if no options are set.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Out-of-band output accumulated during one command invocation.
///
/// Buffers are reset at the start of every exec and reflect the most
/// recently completed command only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutOfBand {
    /// `w` channel payloads.
    pub warnings: Vec<String>,
    /// `p` channel payloads.
    pub progress: Vec<String>,
    /// `t` channel payloads, unparsed.
    pub tickers: Vec<String>,
    /// `e` channel payloads.
    pub errors: Vec<String>,
}

impl OutOfBand {
    fn clear(&mut self) {
        self.warnings.clear();
        self.progress.clear();
        self.tickers.clear();
        self.errors.clear();
    }

    fn push(&mut self, channel: u8, payload: String) {
        match channel {
            b'w' => self.warnings.push(payload),
            b'p' => self.progress.push(payload),
            b't' => self.tickers.push(payload),
            b'e' => self.errors.push(payload),
            _ => {}
        }
    }
}

/// One response chunk as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The command number the chunk belongs to.
    pub cmdnum: u64,
    /// The channel tag: `m`, `w`, `p`, `t`, `e` or `l`.
    pub channel: u8,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Upper bound on a single chunk payload, far above anything monotone
/// emits per chunk. Caps the payload allocation when a corrupt header
/// claims an absurd length.
const MAX_CHUNK_LEN: u64 = 64 * 1024 * 1024;

/// Reader for the chunked response framing.
///
/// Chunks are concatenated with no separator between one payload and
/// the next header, so the header is scanned byte by byte.
pub struct ChunkReader<R> {
    reader: R,
}

impl<R: Read> ChunkReader<R> {
    /// Creates a new chunk reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next chunk, blocking until it is complete.
    pub fn read_chunk(&mut self) -> Result<Chunk> {
        let cmdnum = self.read_number()?;
        let channel = self.read_byte()?;
        if self.read_byte()? != b':' {
            return Err(MtnError::Protocol(
                "missing separator after channel tag".to_string(),
            ));
        }
        let len = self.read_number()?;
        if len > MAX_CHUNK_LEN {
            return Err(MtnError::Protocol(format!(
                "chunk length {len} exceeds the {MAX_CHUNK_LEN} byte limit"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        Ok(Chunk {
            cmdnum,
            channel,
            payload,
        })
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_number(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut seen_digit = false;
        loop {
            let byte = self.read_byte()?;
            match byte {
                b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u64::from(byte - b'0')))
                        .ok_or_else(|| {
                            MtnError::Protocol("chunk header number overflow".to_string())
                        })?;
                    seen_digit = true;
                }
                b':' if seen_digit => return Ok(value),
                other => {
                    return Err(MtnError::Protocol(format!(
                        "unexpected byte {:?} in chunk header",
                        other as char
                    )))
                }
            }
        }
    }
}

/// Reads chunks until the terminal `l` chunk, demultiplexing main
/// output from the out-of-band channels.
///
/// Returns the accumulated main output and the decimal error code.
fn read_response<R: Read>(
    reader: &mut ChunkReader<R>,
    cmdnum: u64,
    oob: &mut OutOfBand,
) -> Result<(Vec<u8>, i32)> {
    let mut output = Vec::new();
    loop {
        let chunk = reader.read_chunk()?;
        trace!(
            cmdnum = chunk.cmdnum,
            channel = %(chunk.channel as char),
            len = chunk.payload.len(),
            "stdio chunk"
        );
        if chunk.cmdnum != cmdnum {
            return Err(MtnError::Desync {
                expected: cmdnum,
                got: chunk.cmdnum,
            });
        }
        match chunk.channel {
            b'm' => output.extend_from_slice(&chunk.payload),
            b'w' | b'p' | b't' | b'e' => oob.push(
                chunk.channel,
                String::from_utf8_lossy(&chunk.payload).into_owned(),
            ),
            b'l' => {
                let code = std::str::from_utf8(&chunk.payload)
                    .ok()
                    .and_then(|s| s.trim().parse::<i32>().ok())
                    .ok_or_else(|| {
                        MtnError::Protocol("malformed error code in terminal chunk".to_string())
                    })?;
                return Ok((output, code));
            }
            other => {
                return Err(MtnError::Protocol(format!(
                    "unknown channel tag {:?}",
                    other as char
                )))
            }
        }
    }
}

/// Serializes a command into the stdio write framing:
/// an optional `o...e ` options block, then the `l...e\n` argument
/// block, all lengths in bytes.
fn frame_command(args: &[&str], options: &CommandOptions) -> String {
    let mut cmd = String::new();
    if !options.is_empty() {
        cmd.push('o');
        for (key, value) in options.iter() {
            cmd.push_str(&format!("{}:{}", key.len(), key));
            cmd.push_str(&format!("{}:{}", value.len(), value));
        }
        cmd.push_str("e ");
    }
    cmd.push('l');
    for arg in args {
        cmd.push_str(&format!("{}:{}", arg.len(), arg));
    }
    cmd.push_str("e\n");
    cmd
}

/// The seam between the repository client and the subprocess.
///
/// Production code uses [`StdioTransport`]; tests substitute stubs to
/// script responses and count wire calls.
pub trait Transport {
    /// Executes one command with options, returning its main output.
    fn exec_with(&mut self, args: &[&str], options: &CommandOptions) -> Result<Vec<u8>>;

    /// Executes one command without options.
    fn exec(&mut self, args: &[&str]) -> Result<Vec<u8>> {
        self.exec_with(args, &CommandOptions::default())
    }

    /// Out-of-band output of the most recently completed command.
    fn out_of_band(&self) -> &OutOfBand;
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: ChunkReader<BufReader<ChildStdout>>,
    cmdnum: u64,
    last_command: String,
}

/// Transport over a live `mtn automate stdio` subprocess.
///
/// The subprocess is spawned lazily on the first exec and owned
/// exclusively by this transport; dropping the transport shuts it
/// down. After a protocol desync the only safe recovery is
/// [`StdioTransport::restart`].
pub struct StdioTransport {
    config: MonotoneConfig,
    shortname: String,
    process: Option<Process>,
    oob: OutOfBand,
}

impl StdioTransport {
    /// Creates a transport for one project. No subprocess is spawned
    /// until the first command or an explicit [`StdioTransport::start`].
    pub fn new(config: MonotoneConfig, shortname: impl Into<String>) -> Self {
        Self {
            config,
            shortname: shortname.into(),
            process: None,
            oob: OutOfBand::default(),
        }
    }

    /// Spawns the subprocess, validates the handshake and resets the
    /// command counter. Stops a previously running subprocess first.
    pub fn start(&mut self) -> Result<()> {
        if self.process.is_some() {
            self.stop();
        }

        let mut command = Command::new(&self.config.mtn_path);
        command.args(&self.config.mtn_opts);
        match self.config.db_access {
            DbAccess::Remote => {
                command
                    .arg("automate")
                    .arg("remote_stdio")
                    .arg(self.config.remote_address(&self.shortname));
            }
            DbAccess::Local => {
                let repo = self.config.repository_path(&self.shortname);
                if !repo.exists() {
                    return Err(MtnError::MissingRepository(repo.display().to_string()));
                }
                command.arg("--db").arg(&repo).arg("automate").arg("stdio");
            }
        }
        command
            .env("LANG", "en_US.UTF-8")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|e| MtnError::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MtnError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MtnError::Spawn("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        let mut reader = BufReader::new(stdout);
        if let Err(err) = Self::handshake(&mut reader) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(match err {
                MtnError::Spawn(msg) => MtnError::Spawn(format!(
                    "{msg}, stderr is:\n{}",
                    Self::drain_stderr(stderr)
                )),
                other => other,
            });
        }

        debug!(project = %self.shortname, "stdio transport started");
        self.process = Some(Process {
            child,
            stdin,
            stdout: ChunkReader::new(reader),
            cmdnum: 0,
            last_command: String::new(),
        });
        Ok(())
    }

    /// Closes the pipes and waits for the subprocess to exit. Safe to
    /// call repeatedly; a stopped transport is a no-op.
    pub fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            drop(process.stdin);
            drop(process.stdout);
            let _ = process.child.wait();
            debug!(project = %self.shortname, "stdio transport stopped");
        }
    }

    /// Stops and starts the subprocess, discarding all protocol state.
    pub fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Returns true if a subprocess is currently running.
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    fn handshake<R: BufRead>(reader: &mut R) -> Result<()> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(MtnError::Spawn(
                "could not determine stdio version".to_string(),
            ));
        }
        let line = line.trim_end();
        let version = line.strip_prefix("format-version: ");
        match version.and_then(|v| v.parse::<u32>().ok()) {
            Some(v) if v == STDIO_VERSION => {}
            _ => {
                return Err(MtnError::VersionMismatch {
                    expected: STDIO_VERSION,
                    got: version.unwrap_or(line).to_string(),
                })
            }
        }
        // one blank separator line follows the version
        let mut blank = String::new();
        reader.read_line(&mut blank)?;
        Ok(())
    }

    fn drain_stderr(stderr: Option<ChildStderr>) -> String {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        if text.is_empty() {
            "<empty>".to_string()
        } else {
            text
        }
    }
}

impl Transport for StdioTransport {
    fn exec_with(&mut self, args: &[&str], options: &CommandOptions) -> Result<Vec<u8>> {
        if self.process.is_none() {
            self.start()?;
        }
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| MtnError::Spawn("stdio transport not running".to_string()))?;

        let framed = frame_command(args, options);
        process.stdin.write_all(framed.as_bytes())?;
        process.stdin.flush()?;
        process.last_command = framed;
        let cmdnum = process.cmdnum;
        process.cmdnum += 1;

        self.oob.clear();
        let (output, code) = read_response(&mut process.stdout, cmdnum, &mut self.oob)?;
        debug!(
            command = %process.last_command.trim_end(),
            cmdnum,
            code,
            "stdio exec"
        );
        if !self.oob.warnings.is_empty() {
            warn!(
                command = %process.last_command.trim_end(),
                warnings = self.oob.warnings.len(),
                "stdio command emitted warnings"
            );
        }
        if code != 0 {
            return Err(MtnError::Command {
                code,
                command: process.last_command.trim_end().to_string(),
                oob_errors: self.oob.errors.join(" "),
            });
        }
        Ok(output)
    }

    fn out_of_band(&self) -> &OutOfBand {
        &self.oob
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
