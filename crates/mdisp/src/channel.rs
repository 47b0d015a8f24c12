// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental message framing over a byte stream.
//!
//! Wire format: a block of `Name: value` header lines (LF-terminated, an
//! optional CR before the LF is stripped), ended by a blank line, followed
//! by exactly the number of payload bytes declared by the `Length` header
//! (zero when absent). Payload bytes are arbitrary binary content.
//!
//! [`MessageChannel::read_message`] is a resumable state machine: a read
//! interrupted by a signal returns [`Error::Interrupted`] and the next call
//! continues at the exact byte offset already consumed, without re-parsing.
//! The channel's mid-parse state implements [`Marshal`], so a message that
//! is only partially received when the process re-execs is reconstructed
//! identically afterward.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::marshal::{Cursor, CursorMut, Marshal, MarshalError, MarshalResult};

/// A header block larger than this without a terminator is malformed.
pub const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// A declared payload larger than this is malformed.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// How much to request from the stream per read call.
const READ_CHUNK: usize = 4096;

const MESSAGE_VERSION: i32 = 1;
const CHANNEL_VERSION: i32 = 1;

/// A parsed protocol message: header strings in arrival order plus the raw
/// payload. Header strings are never empty (a blank line ends the block).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub headers: Vec<String>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Whether any header equals `exact` verbatim.
    pub fn has_header(&self, exact: &str) -> bool {
        self.headers.iter().any(|h| h == exact)
    }

    /// The value of the first header starting with `prefix`
    /// (e.g. `"Length: "`).
    pub fn header_suffix(&self, prefix: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| h.strip_prefix(prefix))
    }

    /// Serialize for transmission: headers, blank line, payload.
    pub fn compose(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.headers.iter().map(|h| h.len() + 1).sum::<usize>() + 1 + self.payload.len(),
        );
        for header in &self.headers {
            out.extend_from_slice(header.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        out
    }
}

impl Marshal for Message {
    fn marshaled_size(&self) -> usize {
        crate::marshal::VERSION_TAG
            + 8
            + self.headers.iter().map(|h| h.len() + 1).sum::<usize>()
            + 8
            + self.payload.len()
    }

    fn marshal(self, out: &mut CursorMut<'_>) -> MarshalResult<()> {
        out.write_i32(MESSAGE_VERSION)?;
        out.write_size(self.headers.len())?;
        for header in &self.headers {
            out.write_cstr(header)?;
        }
        out.write_size(self.payload.len())?;
        out.write_bytes(&self.payload)
    }

    fn unmarshal(data: &mut Cursor<'_>) -> MarshalResult<Self> {
        data.expect_version(MESSAGE_VERSION)?;
        let header_count = data.read_size()?;
        if header_count > data.remaining() {
            return Err(MarshalError::BadLength {
                offset: data.offset(),
                value: header_count as u64,
            });
        }
        let mut headers = Vec::with_capacity(header_count);
        for _ in 0..header_count {
            headers.push(data.read_cstr()?);
        }
        let payload_len = data.read_size()?;
        let payload = data.read_bytes(payload_len)?.to_vec();
        Ok(Message { headers, payload })
    }
}

/// Parse stage of the incremental reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Accumulating header lines until the blank-line terminator.
    Headers,
    /// Reading the declared number of payload bytes.
    Payload,
    /// A complete message was handed out; reset on the next read.
    Done,
}

impl Stage {
    fn to_wire(self) -> u8 {
        match self {
            Stage::Headers => 0,
            Stage::Payload => 1,
            Stage::Done => 2,
        }
    }

    fn from_wire(tag: u8, offset: usize) -> MarshalResult<Self> {
        match tag {
            0 => Ok(Stage::Headers),
            1 => Ok(Stage::Payload),
            2 => Ok(Stage::Done),
            other => Err(MarshalError::BadLength {
                offset,
                value: u64::from(other),
            }),
        }
    }
}

/// Incremental message reader over a byte stream.
///
/// The channel owns no socket; callers pass the stream to each call so the
/// same parse state can survive a reconnect decision or a re-exec.
#[derive(Debug)]
pub struct MessageChannel {
    /// Headers parsed so far for the in-flight message.
    headers: Vec<String>,
    /// Payload bytes received so far.
    payload: Vec<u8>,
    /// Declared payload size (valid once the header block is complete).
    payload_size: usize,
    /// Raw bytes read off the stream but not yet consumed by the parser.
    buffer: Vec<u8>,
    stage: Stage,
}

impl MessageChannel {
    pub fn new() -> Self {
        MessageChannel {
            headers: Vec::new(),
            payload: Vec::new(),
            payload_size: 0,
            buffer: Vec::with_capacity(128),
            stage: Stage::Headers,
        }
    }

    /// Bytes of payload still owed for the in-flight message.
    pub fn remaining_payload(&self) -> usize {
        self.payload_size - self.payload.len()
    }

    /// Whether a message is partially received.
    pub fn mid_message(&self) -> bool {
        self.stage == Stage::Payload || !self.headers.is_empty() || !self.buffer.is_empty()
    }

    /// Read the next message, blocking on `stream` as needed.
    ///
    /// Returns [`Error::Interrupted`] when a signal interrupts the read;
    /// calling again resumes at the exact byte offset already consumed.
    /// [`Error::Malformed`] means the stream is unrecoverable and the
    /// connection must be torn down. A zero-byte read maps to
    /// [`Error::ConnectionReset`].
    pub fn read_message<R: Read>(&mut self, stream: &mut R) -> Result<Message> {
        // A previous call completed a message; start over. Leftover buffer
        // bytes belong to the next message and are kept.
        if self.stage == Stage::Done {
            self.headers.clear();
            self.payload = Vec::new();
            self.payload_size = 0;
            self.stage = Stage::Headers;
        }

        loop {
            if self.stage == Stage::Headers {
                self.consume_headers()?;
            }

            if self.stage == Stage::Payload {
                self.consume_payload();
                if self.payload.len() == self.payload_size {
                    self.stage = Stage::Done;
                    return Ok(Message {
                        headers: std::mem::take(&mut self.headers),
                        payload: std::mem::take(&mut self.payload),
                    });
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let got = stream.read(&mut chunk)?;
            if got == 0 {
                return Err(Error::ConnectionReset);
            }
            self.buffer.extend_from_slice(&chunk[..got]);
        }
    }

    /// Split complete header lines out of the buffer until the blank-line
    /// terminator or until the buffer holds no full line.
    fn consume_headers(&mut self) -> Result<()> {
        while let Some(nl) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=nl).collect();
            line.pop(); // the LF
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                // End of the header block: resolve the payload length.
                self.payload_size = self.declared_length()?;
                self.payload = Vec::with_capacity(self.payload_size);
                self.stage = Stage::Payload;
                return Ok(());
            }

            // "Name: value" is the only accepted shape.
            let colon = line.iter().position(|&b| b == b':');
            match colon {
                Some(i) if line.get(i + 1) == Some(&b' ') => {}
                _ => {
                    return Err(Error::Malformed(
                        "header line without `: ` separator".into(),
                    ))
                }
            }
            let header = String::from_utf8(line)
                .map_err(|_| Error::Malformed("header line is not UTF-8".into()))?;
            self.headers.push(header);
        }

        // The bound covers everything consumed for this header block, not
        // just the residual buffer: parsed lines count too, or a peer
        // sending complete lines forever would never trip it.
        let header_bytes: usize = self.headers.iter().map(|h| h.len() + 1).sum();
        if header_bytes + self.buffer.len() > MAX_HEADER_BLOCK {
            return Err(Error::Malformed(format!(
                "header block exceeds {} bytes without a terminator",
                MAX_HEADER_BLOCK
            )));
        }
        Ok(())
    }

    /// Parse the `Length` header, if any. Strictly decimal and bounded.
    fn declared_length(&self) -> Result<usize> {
        let Some(value) = self
            .headers
            .iter()
            .find_map(|h| h.strip_prefix("Length: "))
        else {
            return Ok(0);
        };
        let length: usize = value
            .parse()
            .map_err(|_| Error::Malformed(format!("unparsable Length header: {:?}", value)))?;
        if length > MAX_PAYLOAD {
            return Err(Error::Malformed(format!(
                "declared payload of {} bytes exceeds the {} byte bound",
                length, MAX_PAYLOAD
            )));
        }
        Ok(length)
    }

    /// Move buffered bytes into the payload, up to the declared size.
    fn consume_payload(&mut self) {
        let need = self.payload_size - self.payload.len();
        let take = need.min(self.buffer.len());
        self.payload.extend(self.buffer.drain(..take));
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshal for MessageChannel {
    fn marshaled_size(&self) -> usize {
        crate::marshal::VERSION_TAG
            + 1
            + 8
            + self.headers.iter().map(|h| h.len() + 1).sum::<usize>()
            + 8
            + 8
            + self.payload.len()
            + 8
            + self.buffer.len()
    }

    fn marshal(self, out: &mut CursorMut<'_>) -> MarshalResult<()> {
        out.write_i32(CHANNEL_VERSION)?;
        out.write_u8(self.stage.to_wire())?;
        out.write_size(self.headers.len())?;
        for header in &self.headers {
            out.write_cstr(header)?;
        }
        out.write_size(self.payload_size)?;
        out.write_size(self.payload.len())?;
        out.write_bytes(&self.payload)?;
        out.write_size(self.buffer.len())?;
        out.write_bytes(&self.buffer)
    }

    fn unmarshal(data: &mut Cursor<'_>) -> MarshalResult<Self> {
        data.expect_version(CHANNEL_VERSION)?;
        let stage_offset = data.offset();
        let stage = Stage::from_wire(data.read_u8()?, stage_offset)?;
        let header_count = data.read_size()?;
        if header_count > data.remaining() {
            return Err(MarshalError::BadLength {
                offset: data.offset(),
                value: header_count as u64,
            });
        }
        let mut headers = Vec::with_capacity(header_count);
        for _ in 0..header_count {
            headers.push(data.read_cstr()?);
        }
        let payload_size = data.read_size()?;
        let payload_got = data.read_size()?;
        if payload_got > payload_size || payload_size > MAX_PAYLOAD {
            return Err(MarshalError::BadLength {
                offset: data.offset(),
                value: payload_size as u64,
            });
        }
        let mut payload = Vec::with_capacity(payload_size);
        payload.extend_from_slice(data.read_bytes(payload_got)?);
        let buffer_len = data.read_size()?;
        let buffer = data.read_bytes(buffer_len)?.to_vec();
        Ok(MessageChannel {
            headers,
            payload,
            payload_size,
            buffer,
            stage,
        })
    }
}

/// Write all of `data`, retrying on interruption.
///
/// Any short write not caused by interruption is fatal and surfaces the
/// underlying error.
pub fn full_write<W: Write>(stream: &mut W, data: &[u8]) -> Result<()> {
    let mut at = 0;
    while at < data.len() {
        match stream.write(&data[at..]) {
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "stream refused further bytes",
                )))
            }
            Ok(n) => at += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
