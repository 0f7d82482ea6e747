//! Monotone backend error types.

use thiserror::Error;

/// Errors that can occur while talking to a monotone subprocess.
#[derive(Debug, Error)]
pub enum MtnError {
    /// The stdio subprocess could not be started.
    #[error("could not start stdio process: {0}")]
    Spawn(String),

    /// The local repository database does not exist.
    #[error("repository file '{0}' does not exist")]
    MissingRepository(String),

    /// The handshake announced an unsupported protocol version.
    #[error("stdio format version mismatch, expected {expected}, got '{got}'")]
    VersionMismatch {
        /// The single version this client speaks.
        expected: u32,
        /// Whatever the handshake line carried, possibly not a number.
        got: String,
    },

    /// A response chunk did not echo the expected command number. The
    /// transport is unusable afterwards; the only recovery is a restart.
    #[error("command numbers out of sync; expected {expected}, got {got}")]
    Desync {
        /// The command number we issued.
        expected: u64,
        /// The command number the chunk carried.
        got: u64,
    },

    /// A malformed response chunk or an unknown channel tag.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The command completed with a non-zero error code.
    #[error("command '{command}' returned error code {code}: {oob_errors}")]
    Command {
        /// The decimal error code from the terminal chunk.
        code: i32,
        /// The framed command line as written to the subprocess.
        command: String,
        /// Concatenated error-channel output.
        oob_errors: String,
    },

    /// Malformed basic_io input, indicating a protocol or backend bug.
    #[error("malformed basic_io at byte {pos}: {message}")]
    Parse {
        /// Byte offset of the failure.
        pos: usize,
        /// What went wrong.
        message: String,
    },

    /// The configured branch has no resolvable revision.
    #[error("branch {0} is empty")]
    EmptyBranch(String),

    /// Command-only file access has no meaning for a stdio-driven backend.
    #[error("operation not supported by the stdio backend")]
    NotImplemented,

    /// A tree entry without file content was used where content is required.
    #[error("entry has no content hash: {0}")]
    NotAFile(String),

    /// The backend produced a revision id we could not parse.
    #[error(transparent)]
    Revision(#[from] forge_scm::InvalidRevisionId),

    /// An I/O error occurred on the subprocess pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for monotone operations.
pub type Result<T> = std::result::Result<T, MtnError>;
