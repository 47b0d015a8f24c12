// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 64-bit client identifiers.
//!
//! A client id packs two 32-bit halves: the connection/server identifier in
//! the high word and a per-connection sequence counter in the low word. The
//! textual form is `high:low`; the literal `0:0` is reserved for "anonymous
//! sender" and never identifies a real client.

use std::fmt;
use std::str::FromStr;

/// A 64-bit client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// The reserved anonymous sender, `0:0`.
pub const ANONYMOUS: ClientId = ClientId(0);

impl ClientId {
    /// Pack a connection identifier and a sequence counter.
    pub fn from_parts(high: u32, low: u32) -> Self {
        ClientId((u64::from(high) << 32) | u64::from(low))
    }

    /// The connection/server half.
    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The sequence-counter half.
    pub fn low(self) -> u32 {
        self.0 as u32
    }

    /// Whether this is the reserved anonymous id.
    pub fn is_anonymous(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high(), self.low())
    }
}

/// Failure to parse a `high:low` client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseClientIdError;

impl fmt::Display for ParseClientIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client id is not of the form high:low")
    }
}

impl std::error::Error for ParseClientIdError {}

impl FromStr for ClientId {
    type Err = ParseClientIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (high, low) = s.split_once(':').ok_or(ParseClientIdError)?;
        let high: u32 = high.parse().map_err(|_| ParseClientIdError)?;
        let low: u32 = low.parse().map_err(|_| ParseClientIdError)?;
        Ok(ClientId::from_parts(high, low))
    }
}
