use std::io;

use thiserror::Error;

/// Errors surfaced while reading DVI-flavored files or using the support
/// cache. Structural problems always name the offending file.
#[derive(Debug, Error)]
pub enum DviError {
    #[error("malformed file {file}: {reason}")]
    Malformed { file: String, reason: String },

    #[error("state precondition failed for opcode {opcode} in {file}")]
    StatePrecondition { file: String, opcode: u8 },

    #[error("unknown dvi format {0}")]
    UnknownFormat(u8),

    #[error("nonstandard units in dvi file")]
    NonstandardUnits,

    #[error("nonstandard magnification in dvi file")]
    NonstandardMagnification,

    #[error("missing font metrics file: {0}")]
    MissingFontMetrics(String),

    #[error("tfm checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("support database {file} has version {found}, expected {expected}")]
    CacheVersion {
        file: String,
        found: i64,
        expected: i64,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl DviError {
    pub(crate) fn malformed(file: &str, reason: impl Into<String>) -> Self {
        DviError::Malformed {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DviError>;
