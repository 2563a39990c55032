use std::io::Error as IoError;

use err_derive::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(display = "No MPQ header found")]
    InvalidFormat,
    #[error(display = "Unsupported MPQ version: {}", version)]
    UnsupportedVersion { version: u16 },
    #[error(display = "Corrupted archive: {}", reason)]
    Corrupt { reason: String },
    #[error(display = "File not found: {}", name)]
    NotFound { name: String },
    #[error(display = "Already exists: {}", name)]
    AlreadyExists { name: String },
    #[error(display = "Hash table is full")]
    TableFull,
    #[error(
        display = "Checksum mismatch in sector {}: expected {:08x}, got {:08x}",
        sector,
        expected,
        actual
    )]
    ChecksumMismatch {
        sector: usize,
        expected: u32,
        actual: u32,
    },
    #[error(display = "Failed to flush archive tables: {}", cause)]
    FlushFailed { cause: Box<Error> },
    #[error(display = "Invalid block index: {}", index)]
    InvalidIndex { index: usize },
    #[error(display = "IO Error: {}", cause)]
    Io { cause: IoError },
    #[error(display = "Compression type unsupported: {}", kind)]
    UnsupportedCompression { kind: String },
    #[error(display = "Archive is opened read-only")]
    ReadOnly,
    #[error(display = "Archive is poisoned by an earlier flush failure")]
    Poisoned,
    #[error(display = "Archive is closed")]
    Closed,
    #[error(display = "Unknown archive handle")]
    InvalidHandle,
    #[error(display = "Invalid options: {}", reason)]
    InvalidOptions { reason: String },
    #[error(
        display = "Cannot resolve the name of entry {:08x}:{:08x}",
        hash_a,
        hash_b
    )]
    UnresolvedName { hash_a: u32, hash_b: u32 },
}

impl Error {
    pub(crate) fn corrupt<S: Into<String>>(reason: S) -> Error {
        Error::Corrupt {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found<S: Into<String>>(name: S) -> Error {
        Error::NotFound { name: name.into() }
    }

    /// Whether the error indicates damaged archive contents rather than
    /// a problem with the request or the storage medium.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::InvalidFormat | Error::Corrupt { .. } | Error::ChecksumMismatch { .. } => true,
            _ => false,
        }
    }
}

impl From<IoError> for Error {
    fn from(other: IoError) -> Self {
        Error::Io { cause: other }
    }
}
