//! Error taxonomy for the nsenter connection adapter
//!
//! Every error here is terminal for the call that raised it; the adapter
//! performs no internal retries. A non-zero exit code from an executed
//! command is ordinary data (`ExecutionResult`), never an `Error`.

use std::path::PathBuf;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid container identity, required privilege, or
    /// required host binary. Raised at connection setup, never retried.
    #[error("invalid connection configuration: {0}")]
    Configuration(String),

    /// A caller requested something this adapter deliberately does not
    /// implement (currently: pipelined input).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An escalation method other than the single supported one.
    #[error("unsupported escalation method: {0}")]
    UnsupportedEscalationMethod(String),

    /// The multiplex wait elapsed while awaiting a password prompt.
    /// Carries everything read from the child up to that point.
    #[error("timeout waiting for privilege escalation prompt:\n{output}")]
    PromptTimeout { output: String },

    /// The child closed its output streams before a prompt or success
    /// marker appeared.
    #[error("child output closed while waiting for privilege escalation prompt:\n{output}")]
    StreamClosed { output: String },

    /// Local-side path missing for a file transfer.
    #[error("file or module does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A file transfer failed below us.
    #[error("failed to copy {} to {}", src.display(), dest.display())]
    Copy {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command chain could not produce a decisive result.
    #[error("command chain produced no result")]
    ChainCondition,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(std::io::Error::from(errno))
    }
}
