// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Byte-exact state serialization for re-exec transplants.
//!
//! Every stateful component implements [`Marshal`]: it can compute its flat
//! size, write itself into a buffer, and be reconstructed from one. The
//! whole service marshals into a single contiguous blob before the process
//! replaces its executable image, and the new image unmarshals the same blob
//! to resume with identical logical state.
//!
//! Encoding is fixed-width little-endian through bounds-checked cursors.
//! Composite types write a version tag first, then their fields in a fixed
//! order. Failing partway through `unmarshal` leaves nothing trustworthy
//! behind; the contract is that the caller aborts the process instead of
//! continuing from unknown state.

pub mod cursor;

pub use cursor::{Cursor, CursorMut};

use std::fmt;

/// Size in bytes of a composite's leading version tag.
pub const VERSION_TAG: usize = 4;

/// Errors raised while marshaling or unmarshaling a state blob.
#[derive(Debug, Clone)]
pub enum MarshalError {
    /// Write ran past the end of the output buffer.
    WriteOverflow { offset: usize },
    /// Read ran past the end of the input buffer.
    ReadOverflow { offset: usize },
    /// A NUL-terminated string field had no terminator.
    UnterminatedString { offset: usize },
    /// A string field was not valid UTF-8.
    InvalidUtf8 { offset: usize },
    /// A version tag did not match what this build understands.
    BadVersion { found: i32, expected: i32 },
    /// A length or capacity field does not fit in memory.
    BadLength { offset: usize, value: u64 },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::WriteOverflow { offset } => {
                write!(f, "write past end of state buffer at offset {}", offset)
            }
            MarshalError::ReadOverflow { offset } => {
                write!(f, "read past end of state buffer at offset {}", offset)
            }
            MarshalError::UnterminatedString { offset } => {
                write!(f, "unterminated string at offset {}", offset)
            }
            MarshalError::InvalidUtf8 { offset } => {
                write!(f, "invalid UTF-8 in string at offset {}", offset)
            }
            MarshalError::BadVersion { found, expected } => {
                write!(f, "state version {} (expected {})", found, expected)
            }
            MarshalError::BadLength { offset, value } => {
                write!(f, "implausible length {} at offset {}", value, offset)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

/// Result alias local to the marshal module.
pub type MarshalResult<T> = std::result::Result<T, MarshalError>;

/// Paired serialize/deserialize operations for state transplant.
///
/// Laws:
/// - `marshaled_size` is pure and cannot fail.
/// - `marshal` writes exactly `marshaled_size()` bytes and consumes the
///   value; its heap allocations are transferred into the flat form.
/// - `unmarshal(marshal(x))` reconstructs a value observably equal to `x`.
pub trait Marshal: Sized {
    /// Flat size of this value in bytes.
    fn marshaled_size(&self) -> usize;

    /// Write the value into `out`, consuming it.
    fn marshal(self, out: &mut CursorMut<'_>) -> MarshalResult<()>;

    /// Reconstruct a value from `data`, advancing the cursor past it.
    fn unmarshal(data: &mut Cursor<'_>) -> MarshalResult<Self>;
}

/// Marshal a value into a freshly allocated, exactly sized buffer.
pub fn to_blob<T: Marshal>(value: T) -> MarshalResult<Vec<u8>> {
    let mut buf = vec![0u8; value.marshaled_size()];
    let mut out = CursorMut::new(&mut buf);
    value.marshal(&mut out)?;
    debug_assert_eq!(out.offset(), buf.len());
    Ok(buf)
}

/// Unmarshal a value that occupies the whole of `data`.
pub fn from_blob<T: Marshal>(data: &[u8]) -> MarshalResult<T> {
    let mut cur = Cursor::new(data);
    T::unmarshal(&mut cur)
}
