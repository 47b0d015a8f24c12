// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # mdisp - micro display-server plumbing
//!
//! Transport, serialization, and registry bookkeeping for a family of
//! cooperating display-server processes that talk over a local rendezvous
//! socket and can replace their own executable image in place without losing
//! protocol state.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     RegistryService                          |
//! |   message pump -> dispatch -> RegistryTable under one lock   |
//! +--------------------------------------------------------------+
//! |  MessageChannel          |  Marshal contract                 |
//! |  incremental framing     |  byte-exact state transplant      |
//! +--------------------------------------------------------------+
//! |  Containers: ArenaList | ClientSet | RegistryTable           |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`channel::MessageChannel`] | Incremental reader for the wire framing |
//! | [`channel::Message`] | Parsed header block plus raw payload |
//! | [`marshal::Marshal`] | Serialize/deserialize contract for re-exec |
//! | [`table::RegistryTable`] | Command name to client-set map |
//! | [`registry::RegistryService`] | The protocol-registry master loop |

/// Index-addressed doubly linked list over flat storage.
pub mod arena;
/// Incremental message framing over a byte stream.
pub mod channel;
/// 64-bit client identifiers (`high:low` textual form).
pub mod client_id;
/// Growable ordered collection of client identifiers.
pub mod client_set;
/// Error taxonomy for transport and dispatch.
pub mod error;
/// Byte-exact state serialization for re-exec transplants.
pub mod marshal;
/// The protocol-registry service: dispatch, waiters, suspend/resume.
pub mod registry;
/// String-keyed registry table (command name -> client set).
pub mod table;

pub use channel::{Message, MessageChannel};
pub use client_id::ClientId;
pub use client_set::ClientSet;
pub use error::{Error, Result};
pub use registry::RegistryService;
pub use table::RegistryTable;
