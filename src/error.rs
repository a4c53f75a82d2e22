// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by every decoder in the crate.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while parsing or extracting a mainframe container.
///
/// Offsets are byte positions within the buffer that was being decoded
/// when the failure occurred (the whole input for the stream decoders, a
/// single record for the IEBCOPY decoders).
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not an XMI or AWS/HET file, or a required magic
    /// value did not match.
    #[error("invalid format at offset {offset}: {reason}")]
    InvalidFormat { reason: String, offset: usize },

    /// A declared length runs past the end of the buffer.
    #[error("truncated input at offset {offset}: {needed} more bytes needed")]
    Truncated { needed: usize, offset: usize },

    /// Encrypted payloads and unknown compression flag combinations.
    #[error("unsupported record at offset {offset}: {reason}")]
    UnsupportedRecord { reason: String, offset: usize },

    /// A character that cannot be represented in the configured EBCDIC
    /// codepage. Decoding is total; only encoding can fail.
    #[error("cannot encode {character:?} in codepage {codepage}")]
    Encoding {
        character: char,
        codepage: &'static str,
    },

    /// The member-data blocks disagree with the PDS directory and the
    /// configuration rejects the DELETED-member fallback.
    #[error("inconsistent archive: {reason}")]
    InconsistentArchive { reason: String },

    /// Filesystem failures on the extraction path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata serialization failures.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>, offset: usize) -> Self {
        Error::InvalidFormat {
            reason: reason.into(),
            offset,
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>, offset: usize) -> Self {
        Error::UnsupportedRecord {
            reason: reason.into(),
            offset,
        }
    }
}
