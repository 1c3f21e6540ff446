// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The error taxonomy described in spec §7: a `(category, cause)` pair, never
//! thrown across the embedding API boundary. Grounded on the teacher's
//! `base/error.rs` (a `Context<ErrorKind>`-style error) and on the `bail!(Kind,
//! msg("..."))` / `.msg()` usage seen throughout `db/recording.rs`. The
//! teacher's `failure` crate and its private `coded` dependency are not
//! available here, so this is a small self-contained `std::error::Error`
//! instead — same shape, same call sites.

use std::fmt;

/// Error category, per spec §7's taxonomy table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// File mismatch, corrupt index, version mismatch.
    Index,
    /// Demuxer open / stream-info failure.
    Parser,
    /// Decoder not found, open failure, decode failure, mid-track format change.
    Codec,
    /// Seek refused, frame-accurate seek impossible, non-linear access attempted.
    Seeking,
    /// Generic decode error, empty frame returned, invalid packet timing.
    Decoding,
    /// The optional audio-dump collaborator.
    WaveWriter,
    /// User cancelled via the progress callback.
    Cancelled,
    /// Audio format change mid-stream, codec family we decline.
    Unsupported,
    /// Any memory-allocation failure.
    AllocationFailed,
    /// A `TrackTable`/`Index` invariant was violated; indicates a bug or a
    /// corrupt index, not a collaborator failure.
    Internal,
    /// The persisted index or sample index bytes are malformed.
    DataLoss,
    /// An argument is outside the range the callee can serve.
    OutOfRange,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            ErrorKind::Index => "index",
            ErrorKind::Parser => "parser",
            ErrorKind::Codec => "codec",
            ErrorKind::Seeking => "seeking",
            ErrorKind::Decoding => "decoding",
            ErrorKind::WaveWriter => "wave writer",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::AllocationFailed => "allocation failed",
            ErrorKind::Internal => "internal",
            ErrorKind::DataLoss => "data loss",
            ErrorKind::OutOfRange => "out of range",
        };
        f.write_str(s)
    }
}

/// An error carrying an [`ErrorKind`], an optional formatted message, and an
/// optional source (e.g. an I/O error from the collaborator that failed).
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: Some(msg.into()),
            source: None,
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Error {
            kind,
            msg: None,
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            kind,
            msg: Some(msg.into()),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The formatted message, if any. Tests match on this directly, as in the
    /// teacher's `recording::tests::test_iterator_errors`.
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.msg, &self.source) {
            (Some(m), Some(s)) => write!(f, "{}: {}: {}", self.kind, m, s),
            (Some(m), None) => write!(f, "{}: {}", self.kind, m),
            (None, Some(s)) => write!(f, "{}: {}", self.kind, s),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as _)
    }
}

/// Extension methods for annotating a foreign `Result` with an [`ErrorKind`].
pub trait ResultExt<T> {
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::with_source(k, e.to_string(), e))
    }
}

/// Returns an error of the given kind from the current function.
///
/// ```ignore
/// bail!(DataLoss, msg("bad varint at offset {i}"));
/// bail!(Internal);
/// ```
#[macro_export]
macro_rules! bail {
    ($kind:ident, msg($($arg:tt)*)) => {
        return Err($crate::Error::new($crate::ErrorKind::$kind, format!($($arg)*)))
    };
    ($kind:ident) => {
        return Err($crate::Error::from_kind($crate::ErrorKind::$kind))
    };
}
