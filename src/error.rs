//! Errors this crate can emit.
//!
//! Transport failures (a failed `create`, `upload_part`, `finalize`, or `cancel`) are never
//! returned from [`crate::UploadController`]'s public surface — they are absorbed into the
//! upload's `status`, observable through [`crate::StatusHandle`]. The only errors this crate
//! returns are setup mistakes (an invalid [`crate::TransportConfig`]) and programmer misuse of
//! the controller (e.g. calling `start` on an aborted upload).
use std::fmt::{self, Display, Formatter};

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// The value returned in this crate when an error occurs.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(pub(crate) ErrorRepr);

impl Error {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            ErrorRepr::Config(_) => ErrorKind::Config,
            ErrorRepr::Invariant(_) => ErrorKind::Invariant,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self(ErrorRepr::Config(msg.into()))
    }

    pub(crate) fn invariant(msg: &'static str) -> Self {
        Self(ErrorRepr::Invariant(msg))
    }
}

impl From<ErrorRepr> for Error {
    fn from(value: ErrorRepr) -> Self {
        Self(value)
    }
}

/// The category of the error.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A configuration or setup value was invalid (bad base URL, unreadable file, ...).
    Config,
    /// An internal invariant was violated — a programmer error in a caller of this crate.
    Invariant,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Invariant => write!(f, "invariant"),
        }
    }
}

/// Internal error representation, free to change without a semver bump.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorRepr {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}
