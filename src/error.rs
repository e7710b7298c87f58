//! Error kinds for the checker's external interfaces (spec section 7:
//! usage/I/O, input validation). Analysis rejection (cycle, exhausted
//! search) is never represented here -- it is the `false` returned by
//! `check()`.

use thiserror::Error;

/// Everything that can go wrong before analysis begins.
#[derive(Error, Debug)]
pub enum AxeError {
    /// Bad flags, missing file, conflicting stdin use, unknown model name.
    #[error("usage error: {0}")]
    Usage(String),

    /// Could not read a file the CLI was pointed at.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Trace-file grammar violation.
    #[error("line {line}: {message}")]
    Parse { line: u32, message: String },

    /// Trace-invariant violation discovered while canonicalizing a parsed
    /// instruction list (duplicate reads-from, contradictory finals,
    /// out-of-range ids, writing 0, bad timestamps).
    #[error("line {line}: {message}")]
    Trace { line: u32, message: String },
}

impl AxeError {
    pub fn usage(message: impl Into<String>) -> Self {
        AxeError::Usage(message.into())
    }

    pub fn parse(line: u32, message: impl Into<String>) -> Self {
        AxeError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn trace(line: u32, message: impl Into<String>) -> Self {
        AxeError::Trace {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        AxeError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AxeError>;
