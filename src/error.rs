//! Error taxonomy shared by every codec in this crate.
//!
//! Mirrors the taxonomy the formats were distilled from: `EndOfFile` for an
//! expected terminator hit at stream end, `ShortRead` for truncation inside a
//! fixed-size field, `FileError` for a semantic violation of a format's
//! rules, and `BadFileType` as a probe signal (not a user-facing error) used
//! by the reader-dispatch loop in `unconverter`.

use std::io;
use thiserror::Error;

/// Errors raised while decoding any of the wire formats in this crate.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Hit EOF while trying to read the first byte of an expected struct.
    #[error("unexpected end of file reading {what} ({size} bytes expected)")]
    EndOfFile {
        /// Name of the field/struct being read, for diagnostics.
        what: &'static str,
        /// Size in bytes that was expected.
        size: usize,
    },

    /// Read fewer bytes than a fixed-size field requires.
    #[error("short read: got {got}/{want} bytes reading {what}")]
    ShortRead {
        /// Name of the field/struct being read.
        what: &'static str,
        /// Bytes actually read.
        got: usize,
        /// Bytes required.
        want: usize,
    },

    /// The format's rules were violated (bad coordinates, unknown command,
    /// datalen mismatch, reserved field nonzero, etc).
    #[error("{context}: expected {expected}, got {observed}")]
    Validation {
        /// Human-readable field/condition name.
        context: String,
        /// What was expected.
        expected: String,
        /// What was observed.
        observed: String,
    },

    /// Magic bytes (and, where present, version) did not match this reader.
    /// Used as a probe signal by the dispatch layer, not a user error.
    #[error("magic mismatch, not a {0} file")]
    BadFileType(&'static str),

    /// Underlying I/O failure, propagated as-is.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FormatError {
    pub(crate) fn validation(context: impl Into<String>, expected: impl ToString, observed: impl ToString) -> Self {
        FormatError::Validation {
            context: context.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// True if this is the probe signal a reader dispatch loop should treat
    /// as "try the next reader" rather than an abort-worthy error.
    pub fn is_bad_file_type(&self) -> bool {
        matches!(self, FormatError::BadFileType(_))
    }
}

/// Errors raised while preparing a source image for encoding.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// The external image library failed to open/decode the source file.
    #[error("failed to open image {path}: {source}")]
    Open {
        /// Path of the file that failed to open.
        path: String,
        /// Underlying error from the image crate.
        #[source]
        source: image::ImageError,
    },

    /// A background color spec string failed to parse.
    #[error("bad background color {0:?}: {1}")]
    BadBackgroundColor(String, &'static str),

    /// A bpp value outside {16, 24} was requested.
    #[error("bad bpp {0}, must be 16 or 24")]
    BadBpp(u32),
}

pub type FormatResult<T> = Result<T, FormatError>;
