// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounds-checked read/write cursors over flat state buffers.
//!
//! All multi-byte integers are little-endian. `usize` quantities travel as
//! `u64` so a blob marshaled on one word size unmarshals on another.

use super::{MarshalError, MarshalResult};

macro_rules! impl_write {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self, value: $type) -> MarshalResult<()> {
            if self.offset + $size > self.buffer.len() {
                return Err(MarshalError::WriteOverflow {
                    offset: self.offset,
                });
            }
            self.buffer[self.offset..self.offset + $size].copy_from_slice(&value.to_le_bytes());
            self.offset += $size;
            Ok(())
        }
    };
}

macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> MarshalResult<$type> {
            if self.offset + $size > self.buffer.len() {
                return Err(MarshalError::ReadOverflow {
                    offset: self.offset,
                });
            }
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(&self.buffer[self.offset..self.offset + $size]);
            self.offset += $size;
            Ok(<$type>::from_le_bytes(bytes))
        }
    };
}

/// Write cursor.
pub struct CursorMut<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> CursorMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    impl_write!(write_u8, u8, 1);
    impl_write!(write_u32, u32, 4);
    impl_write!(write_i32, i32, 4);
    impl_write!(write_u64, u64, 8);

    /// Write a `usize` as `u64`.
    pub fn write_size(&mut self, value: usize) -> MarshalResult<()> {
        self.write_u64(value as u64)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> MarshalResult<()> {
        if self.offset + data.len() > self.buffer.len() {
            return Err(MarshalError::WriteOverflow {
                offset: self.offset,
            });
        }
        self.buffer[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        Ok(())
    }

    /// Write a string followed by a NUL terminator.
    pub fn write_cstr(&mut self, s: &str) -> MarshalResult<()> {
        debug_assert!(!s.as_bytes().contains(&0));
        self.write_bytes(s.as_bytes())?;
        self.write_u8(0)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Read cursor.
pub struct Cursor<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    impl_read!(read_u8, u8, 1);
    impl_read!(read_u32, u32, 4);
    impl_read!(read_i32, i32, 4);
    impl_read!(read_u64, u64, 8);

    /// Read a `u64` and narrow it to `usize`, rejecting implausible values.
    pub fn read_size(&mut self) -> MarshalResult<usize> {
        let offset = self.offset;
        let value = self.read_u64()?;
        usize::try_from(value).map_err(|_| MarshalError::BadLength { offset, value })
    }

    pub fn read_bytes(&mut self, len: usize) -> MarshalResult<&'a [u8]> {
        if self.offset + len > self.buffer.len() {
            return Err(MarshalError::ReadOverflow {
                offset: self.offset,
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> MarshalResult<String> {
        let start = self.offset;
        let rest = &self.buffer[self.offset..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(MarshalError::UnterminatedString { offset: start })?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| MarshalError::InvalidUtf8 { offset: start })?
            .to_owned();
        self.offset += nul + 1;
        Ok(s)
    }

    /// Check that a version tag matches, surfacing both values if not.
    pub fn expect_version(&mut self, expected: i32) -> MarshalResult<()> {
        let found = self.read_i32()?;
        if found != expected {
            return Err(MarshalError::BadVersion { found, expected });
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }
}
