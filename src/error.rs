// ============================================================================
// error.rs — typed error hierarchy
// ============================================================================
//
// Fatal conditions (§7) get their own variant so `main` can map them to
// distinct exit codes and a single human-readable line; recoverable
// conditions (generator failures, soft header misses) are logged in place
// by the component that hit them and never constructed as an `Error`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: {message}")]
    NinjaParse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error(
        "{} unresolved target(s) after parsing: {}",
        .names.len(),
        .names.join(", ")
    )]
    UnresolvedTargets { names: Vec<String> },

    #[error("{path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    #[error("{0}")]
    Cli(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The exit code `main` should use for this error: a distinct code for
    /// CLI usage errors, and another for every other fatal condition
    /// (parse failures, unresolved targets, manifest errors, I/O).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cli(_) => 2,
            Error::UnresolvedTargets { .. } => 1,
            Error::NinjaParse { .. } => 1,
            Error::ManifestParse { .. } => 1,
            Error::Io { .. } => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
