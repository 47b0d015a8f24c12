// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the transport and dispatch layers.
//!
//! The split mirrors how the service reacts:
//! - [`Error::Malformed`] kills the connection, never retried.
//! - [`Error::ConnectionReset`] triggers a reconnect through the caller.
//! - [`Error::Interrupted`] is always retried at the exact resume point.
//! - [`Error::Io`] is fatal to the service loop.
//!
//! Ignorable protocol misuse (anonymous sender, malformed id, missing
//! message id, unknown action) is *not* an error: dispatch logs it and the
//! message simply has no effect.

use std::fmt;
use std::io;

/// Errors surfaced by the message channel and the registry service.
#[derive(Debug)]
pub enum Error {
    /// The byte stream violates the framing protocol. Unrecoverable for
    /// this connection; the caller must tear it down.
    Malformed(String),
    /// The peer reset the connection. Recoverable by reconnecting.
    ConnectionReset,
    /// A blocking read or write was interrupted by a signal. The operation
    /// can be retried without losing position.
    Interrupted,
    /// Any other I/O failure. Fatal to the service loop.
    Io(io::Error),
    /// State transplant (marshal/unmarshal) failed. By contract the hosting
    /// process must abort rather than run with half-reconstructed state.
    State(crate::marshal::MarshalError),
    /// A suspend was attempted while watch handles were still alive. The
    /// transplant requires exclusive access to the registry state.
    WatchersActive,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(reason) => write!(f, "malformed message: {}", reason),
            Error::ConnectionReset => write!(f, "connection reset by peer"),
            Error::Interrupted => write!(f, "interrupted, retry"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::State(e) => write!(f, "state transplant failed: {}", e),
            Error::WatchersActive => {
                write!(f, "cannot suspend while watch handles are alive")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::State(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::Interrupted => Error::Interrupted,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            _ => Error::Io(e),
        }
    }
}

impl From<crate::marshal::MarshalError> for Error {
    fn from(e: crate::marshal::MarshalError) -> Self {
        Error::State(e)
    }
}

/// Convenient alias for results using the crate `Error`.
pub type Result<T> = std::result::Result<T, Error>;
