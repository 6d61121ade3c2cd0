//! Typed errors for the parsing and process layers.
//!
//! Stage drivers wrap these in `anyhow` with file context; nothing here is
//! fatal to a whole batch on its own.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment extraction or merge error.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file '{}' does not exist", path.display())]
    MissingFile { path: PathBuf },

    /// A configuration field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: malformed column header {text:?}")]
    BadHeader { line: usize, text: String },

    #[error("line {line}: expected {expected} values, found {found}")]
    RowWidth {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: {token:?} is not a number")]
    BadValue { line: usize, token: String },

    #[error("{0} is not a valid source number")]
    BadSourceId(f64),

    #[error("column '{0}' not present in catalog")]
    MissingColumn(String),

    #[error("catalog column layouts differ: {0}")]
    LayoutMismatch(String),

    #[error("malformed array suffix definition {0:?}")]
    BadSuffixTable(String),

    #[error("catalog has no rows")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("cannot interpret fit result {0:?}")]
    Unrecognised(String),

    #[error("{raw:?}: {token:?} is not a number")]
    BadNumber { raw: String, token: String },
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to kill '{program}' after timeout: {source}")]
    Kill {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
