//! The crate's error type.
//!
//! Every fallible operation in `beamdump` returns [`Result`], whose error
//! variants are the handful of failure categories a recording session can
//! actually hit: a bad command line, an OS call that failed, a malformed
//! packet header, or a channel that can't keep up. `main` maps any of these
//! to a nonzero exit code; nothing downstream needs to distinguish further.

use std::io;
use std::path::PathBuf;

/// The crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{op} failed")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to open output file {path:?}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn compressor {command:?}")]
    CompressorSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handler")]
    Signal(#[source] io::Error),
}

impl Error {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }
}
