// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The protocol-registry service.
//!
//! Keeps the mapping from protocol command name to the set of clients able
//! to serve it. One blocking message pump reads requests off the rendezvous
//! connection, dispatches them, and mutates the [`RegistryTable`] under a
//! single critical section per message. The whole service can suspend into
//! a flat byte blob before the hosting process replaces its executable
//! image, and resume from that blob afterward with identical logical state,
//! including a request that was only partially read off the wire.
//!
//! Request shape (see [`crate::channel`] for framing):
//!
//! ```text
//! Command: register
//! Client ID: 5:1
//! Message ID: 0
//! Action: add
//! Length: 6
//!
//! paint\n
//! ```
//!
//! A message without a `Command: register` header is treated as a close
//! notification and scanned for `Client closed: ` headers instead.

mod state;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channel::{full_write, Message, MessageChannel};
use crate::client_id::{ClientId, ANONYMOUS};
use crate::client_set::ClientSet;
use crate::error::{Error, Result};
use crate::marshal::{Cursor, CursorMut, Marshal};
use crate::table::RegistryTable;

use state::{Shared, Waiter};
pub use state::RegistryWatch;

const SERVICE_VERSION: i32 = 1;

/// The boot broadcast: ask the master to intercept registration traffic and
/// close notifications for us, then ask every peer to resend its
/// registrations. Covers both cold start (peers registered before this
/// service existed) and recovery after a crash window. Uses message IDs 0
/// and 1, so the running counter starts at 2.
const BOOT_BROADCAST: &[u8] = b"Command: intercept\n\
      Message ID: 0\n\
      Length: 32\n\
      \n\
      Command: register\n\
      Client closed\n\
      Command: reregister\n\
      Message ID: 1\n\
      \n";

/// Why the pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Termination was requested; tear the service down.
    Terminated,
    /// A re-exec was requested; the caller should suspend and replace the
    /// process image.
    Reexec,
}

/// Signal-safe request flags checked by the pump between messages.
///
/// A signal handler sets a flag and interrupts the blocking read; the pump
/// notices on the next loop iteration.
#[derive(Debug, Default)]
pub struct ControlFlags {
    terminate: AtomicBool,
    reexec: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn request_reexec(&self) {
        self.reexec.store(true, Ordering::SeqCst);
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn reexec_requested(&self) -> bool {
        self.reexec.load(Ordering::SeqCst)
    }
}

/// The connection the pump runs over.
///
/// Reconnection policy lives with the connection owner, not the service:
/// after a [`Error::ConnectionReset`] the pump discards its partial parse
/// state and asks the transport to re-establish the link once. If that
/// fails the pump gives up.
pub trait Transport: Read + Write {
    fn reconnect(&mut self) -> Result<()>;
}

/// The protocol-registry master: message pump, dispatcher, and transplant
/// endpoint.
#[derive(Debug)]
pub struct RegistryService {
    channel: MessageChannel,
    /// Next outbound message ID. Wraps from `i32::MAX` back to 0.
    next_message_id: i32,
    /// Whether the boot broadcast has been sent on this logical instance.
    /// Survives a transplant, so a resumed service does not re-broadcast.
    connected: bool,
    shared: Arc<Shared>,
}

impl RegistryService {
    pub fn new() -> Self {
        RegistryService {
            channel: MessageChannel::new(),
            next_message_id: 0,
            connected: false,
            shared: Arc::new(Shared::new(RegistryTable::new())),
        }
    }

    /// A cloneable read-side handle for other threads. Outstanding watches
    /// block [`suspend`](Self::suspend).
    pub fn watch(&self) -> RegistryWatch {
        RegistryWatch {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the message pump until termination or re-exec is requested, or
    /// until the connection fails unrecoverably.
    pub fn run<T: Transport>(&mut self, transport: &mut T, flags: &ControlFlags) -> Result<Outcome> {
        if !self.connected {
            log::info!("first initialization, requesting reregistration from all peers");
            full_write(transport, BOOT_BROADCAST)?;
            self.next_message_id = 2;
            self.connected = true;
        }

        loop {
            if flags.terminate_requested() {
                return Ok(Outcome::Terminated);
            }
            if flags.reexec_requested() {
                return Ok(Outcome::Reexec);
            }

            match self.channel.read_message(transport) {
                Ok(message) => self.dispatch(&message, transport)?,
                // Re-check the flags; a signal handler set one and broke the
                // blocking read. Parse position is preserved.
                Err(Error::Interrupted) => continue,
                Err(Error::ConnectionReset) => {
                    log::warn!("lost the rendezvous connection, reconnecting");
                    self.channel = MessageChannel::new();
                    transport.reconnect()?;
                }
                Err(e) => {
                    log::error!("unrecoverable transport failure: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Handle one received message. Write failures are fatal; everything
    /// wrong with the message itself is logged and ignored.
    pub fn dispatch<W: Write>(&mut self, message: &Message, out: &mut W) -> Result<()> {
        if message.has_header("Command: register") {
            self.handle_registration(message, out)
        } else {
            self.handle_close_notification(message);
            Ok(())
        }
    }

    fn handle_registration<W: Write>(&mut self, message: &Message, out: &mut W) -> Result<()> {
        // One pass over the headers; the first occurrence of each wins.
        let mut client_id = None;
        let mut message_id = None;
        let mut length = None;
        let mut action = None;
        for header in &message.headers {
            if let Some(v) = header.strip_prefix("Client ID: ") {
                client_id.get_or_insert(v);
            } else if let Some(v) = header.strip_prefix("Message ID: ") {
                message_id.get_or_insert(v);
            } else if let Some(v) = header.strip_prefix("Length: ") {
                length.get_or_insert(v);
            } else if let Some(v) = header.strip_prefix("Action: ") {
                action.get_or_insert(v);
            }
            if client_id.is_some() && message_id.is_some() && length.is_some() && action.is_some()
            {
                break;
            }
        }

        // Validation failures never answer and never kill the loop; the
        // sender simply gets no effect.
        let Some(client_id) = client_id else {
            log::debug!("ignoring registration from an anonymous sender");
            return Ok(());
        };
        let client: ClientId = match client_id.parse() {
            Ok(id) if id != ANONYMOUS => id,
            Ok(_) => {
                log::debug!("ignoring registration from an anonymous sender");
                return Ok(());
            }
            Err(_) => {
                log::debug!("ignoring registration with malformed client id {:?}", client_id);
                return Ok(());
            }
        };
        if length.is_none() && action != Some("list") {
            log::debug!("ignoring empty registration with no actionable effect");
            return Ok(());
        }
        let Some(message_id) = message_id else {
            log::debug!("ignoring message without a message id, the client is misbehaving");
            return Ok(());
        };

        // An omitted action means "add"; any other unknown value is ignored.
        match action.unwrap_or("add") {
            "add" => self.action_add(client, message, out),
            "remove" => {
                self.action_remove(client, message);
                Ok(())
            }
            "wait" => self.action_wait(client, message_id, message, out),
            "list" => self.action_list(client, message_id, out),
            other => {
                log::debug!("ignoring registration with unknown action {:?}", other);
                Ok(())
            }
        }
    }

    /// Register `client` for every command named in the payload, then wake
    /// whatever waiters this satisfied. The whole batch is one critical
    /// section, so it appears atomic to listers and waiters.
    fn action_add<W: Write>(
        &mut self,
        client: ClientId,
        message: &Message,
        out: &mut W,
    ) -> Result<()> {
        let Some(commands) = payload_commands(message) else {
            return Ok(());
        };

        let mut satisfied = Vec::new();
        let mut grew = false;
        {
            let mut reg = self.shared.reg.lock();
            for command in &commands {
                match reg.table.get_mut(command) {
                    Some(set) => set.add(client),
                    None => {
                        let mut set = ClientSet::with_capacity(1);
                        set.add(client);
                        reg.table.insert(command.to_string(), set);
                        grew = true;
                    }
                }
                reg.advance_waiters(command, &mut satisfied);
            }
            if grew || !satisfied.is_empty() {
                self.shared.wakeup.notify_all();
            }
        }

        for waiter in satisfied {
            let notice = self.waiter_notice(&waiter);
            log::debug!(
                "wait request of client {} satisfied, notifying",
                waiter.client
            );
            full_write(out, &notice)?;
        }
        Ok(())
    }

    /// Remove `client` from every command named in the payload. An entry
    /// left without clients is dropped from the table entirely.
    fn action_remove(&mut self, client: ClientId, message: &Message) {
        let Some(commands) = payload_commands(message) else {
            return;
        };

        let mut reg = self.shared.reg.lock();
        for command in &commands {
            let emptied = match reg.table.get_mut(command) {
                Some(set) => {
                    set.remove(client);
                    set.is_empty()
                }
                None => false,
            };
            if emptied {
                reg.table.remove(command);
            }
        }
    }

    /// Park a wait request for the payload's commands. If everything is
    /// already registered the notification goes out immediately; otherwise
    /// the request is retained until later registrations satisfy it.
    fn action_wait<W: Write>(
        &mut self,
        client: ClientId,
        message_id: &str,
        message: &Message,
        out: &mut W,
    ) -> Result<()> {
        let Some(commands) = payload_commands(message) else {
            return Ok(());
        };

        // Membership check and parking happen under one lock acquisition.
        // Releasing it in between would let a registration slip through
        // unseen and leave the waiter parked forever.
        let satisfied = {
            let mut reg = self.shared.reg.lock();
            let pending: Vec<String> = commands
                .iter()
                .filter(|c| !reg.table.contains(c))
                .map(|c| c.to_string())
                .collect();
            let waiter = Waiter {
                client,
                in_response_to: message_id.to_string(),
                pending,
            };
            if waiter.pending.is_empty() {
                Some(waiter)
            } else {
                let tail = reg.waiters.prev(crate::arena::EDGE);
                reg.waiters.insert_after(waiter, tail);
                None
            }
        };
        match satisfied {
            Some(waiter) => {
                let notice = self.waiter_notice(&waiter);
                full_write(out, &notice)
            }
            None => Ok(()),
        }
    }

    /// Answer with every registered command, one per line. Header block and
    /// payload go out as two separate full-writes.
    fn action_list<W: Write>(&mut self, client: ClientId, message_id: &str, out: &mut W) -> Result<()> {
        let payload: Vec<u8> = {
            let reg = self.shared.reg.lock();
            let mut buf = Vec::new();
            for command in reg.table.commands() {
                buf.extend_from_slice(command.as_bytes());
                buf.push(b'\n');
            }
            buf
        };

        let head = Message {
            headers: vec![
                format!("To: {}", client),
                format!("In response to: {}", message_id),
                format!("Message ID: {}", self.take_message_id()),
                format!("Length: {}", payload.len()),
            ],
            payload: Vec::new(),
        };
        full_write(out, &head.compose())?;
        full_write(out, &payload)
    }

    /// Drop a disconnected client from the whole table. A full scan is fine
    /// here; disconnections are rare next to registrations.
    fn handle_close_notification(&mut self, message: &Message) {
        for header in &message.headers {
            let Some(id) = header.strip_prefix("Client closed: ") else {
                continue;
            };
            let client: ClientId = match id.parse() {
                Ok(c) => c,
                Err(_) => {
                    log::debug!("ignoring close notification with malformed id {:?}", id);
                    continue;
                }
            };

            log::debug!("client {} closed, scrubbing its registrations", client);
            let mut reg = self.shared.reg.lock();
            let emptied: Vec<String> = reg
                .table
                .iter()
                .filter(|(_, set)| set.contains(client))
                .map(|(command, _)| command.to_string())
                .collect();
            for command in emptied {
                let drop_entry = match reg.table.get_mut(&command) {
                    Some(set) => {
                        set.remove(client);
                        set.is_empty()
                    }
                    None => false,
                };
                if drop_entry {
                    reg.table.remove(&command);
                }
            }
            reg.drop_waiters_of(client);
        }
    }

    /// Header-only notification telling a waiter its command set is now
    /// fully registered.
    fn waiter_notice(&mut self, waiter: &Waiter) -> Vec<u8> {
        let msg = Message {
            headers: vec![
                format!("To: {}", waiter.client),
                format!("In response to: {}", waiter.in_response_to),
                format!("Message ID: {}", self.take_message_id()),
            ],
            payload: Vec::new(),
        };
        msg.compose()
    }

    fn take_message_id(&mut self) -> i32 {
        let id = self.next_message_id;
        self.next_message_id = if id == i32::MAX { 0 } else { id + 1 };
        id
    }

    /// Serialize the whole service into one flat blob before a re-exec.
    ///
    /// Layout: version, connected flag, next message ID, pending-channel
    /// size and bytes, then the table. Outstanding wait requests are tied
    /// to the old connection and are deliberately not carried over.
    ///
    /// Requires exclusive access: every [`RegistryWatch`] must be dropped
    /// first.
    pub fn suspend(self) -> Result<Vec<u8>> {
        let shared = Arc::try_unwrap(self.shared).map_err(|_| Error::WatchersActive)?;
        let table = shared.reg.into_inner().table;

        let channel_size = self.channel.marshaled_size();
        let total =
            crate::marshal::VERSION_TAG + 4 + 4 + 8 + channel_size + table.marshaled_size();
        let mut blob = vec![0u8; total];
        let mut out = CursorMut::new(&mut blob);
        out.write_i32(SERVICE_VERSION)?;
        out.write_i32(i32::from(self.connected))?;
        out.write_i32(self.next_message_id)?;
        out.write_size(channel_size)?;
        self.channel.marshal(&mut out)?;
        table.marshal(&mut out)?;
        Ok(blob)
    }

    /// Reconstruct a service from a [`suspend`](Self::suspend) blob.
    ///
    /// A failure here means the transplanted state cannot be trusted; the
    /// hosting process must abort and let the supervisor respawn it, rather
    /// than continue from unknown state.
    pub fn resume(blob: &[u8]) -> Result<Self> {
        let mut data = Cursor::new(blob);
        data.expect_version(SERVICE_VERSION)?;
        let connected = data.read_i32()? != 0;
        let next_message_id = data.read_i32()?;
        let channel_size = data.read_size()?;
        let mut channel_data = Cursor::new(data.read_bytes(channel_size)?);
        let channel = MessageChannel::unmarshal(&mut channel_data)?;
        let table = RegistryTable::unmarshal(&mut data)?;

        Ok(RegistryService {
            channel,
            next_message_id,
            connected,
            shared: Arc::new(Shared::new(table)),
        })
    }
}

impl Default for RegistryService {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the payload as a newline-separated command-name list. A payload
/// that is not UTF-8 cannot name any command; the message is ignored.
fn payload_commands(message: &Message) -> Option<Vec<&str>> {
    match std::str::from_utf8(&message.payload) {
        Ok(text) => Some(text.split('\n').filter(|l| !l.is_empty()).collect()),
        Err(_) => {
            log::debug!("ignoring registration with a non-text payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(client: &str, message_id: i32, action: &str, commands: &str) -> Message {
        let mut headers = vec![
            "Command: register".to_string(),
            format!("Client ID: {}", client),
            format!("Message ID: {}", message_id),
            format!("Action: {}", action),
        ];
        if !commands.is_empty() {
            headers.push(format!("Length: {}", commands.len()));
        }
        Message {
            headers,
            payload: commands.as_bytes().to_vec(),
        }
    }

    fn close_notice(client: &str) -> Message {
        Message {
            headers: vec![format!("Client closed: {}", client)],
            payload: Vec::new(),
        }
    }

    fn listing(service: &mut RegistryService) -> String {
        let mut out = Vec::new();
        service
            .dispatch(&register("1:9", 99, "list", ""), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let (_head, payload) = text.split_once("\n\n").unwrap();
        payload.to_string()
    }

    #[test]
    fn test_register_then_list() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        assert!(out.is_empty());

        assert_eq!(listing(&mut service), "paint\n");
    }

    #[test]
    fn test_list_response_headers() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();

        let mut reply = Vec::new();
        service
            .dispatch(&register("7:2", 31, "list", ""), &mut reply)
            .unwrap();
        let text = String::from_utf8(reply).unwrap();
        let (head, payload) = text.split_once("\n\n").unwrap();
        let headers: Vec<&str> = head.split('\n').collect();
        assert_eq!(headers[0], "To: 7:2");
        assert_eq!(headers[1], "In response to: 31");
        assert!(headers[2].starts_with("Message ID: "));
        assert_eq!(headers[3], "Length: 6");
        assert_eq!(payload, "paint\n");
    }

    #[test]
    fn test_anonymous_sender_is_ignored() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("0:0", 0, "add", "paint\n"), &mut out)
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(listing(&mut service), "");
    }

    #[test]
    fn test_malformed_client_id_is_ignored() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("five", 0, "add", "paint\n"), &mut out)
            .unwrap();
        assert_eq!(listing(&mut service), "");
    }

    #[test]
    fn test_missing_message_id_is_ignored() {
        let mut service = RegistryService::new();
        let msg = Message {
            headers: vec![
                "Command: register".into(),
                "Client ID: 5:1".into(),
                "Length: 6".into(),
            ],
            payload: b"paint\n".to_vec(),
        };
        let mut out = Vec::new();
        service.dispatch(&msg, &mut out).unwrap();
        assert_eq!(listing(&mut service), "");
    }

    #[test]
    fn test_action_header_is_honored() {
        // `Action: remove` must actually remove; the action value drives
        // dispatch rather than being coerced to an add.
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        service
            .dispatch(&register("5:1", 1, "remove", "paint\n"), &mut out)
            .unwrap();

        assert_eq!(listing(&mut service), "");
    }

    #[test]
    fn test_missing_action_defaults_to_add() {
        let mut service = RegistryService::new();
        let msg = Message {
            headers: vec![
                "Command: register".into(),
                "Client ID: 5:1".into(),
                "Message ID: 0".into(),
                "Length: 6".into(),
            ],
            payload: b"paint\n".to_vec(),
        };
        let mut out = Vec::new();
        service.dispatch(&msg, &mut out).unwrap();
        assert_eq!(listing(&mut service), "paint\n");
    }

    #[test]
    fn test_unknown_action_is_ignored() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "destroy", "paint\n"), &mut out)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(listing(&mut service), "");
    }

    #[test]
    fn test_duplicate_registration_is_preserved() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        service
            .dispatch(&register("5:1", 1, "add", "paint\n"), &mut out)
            .unwrap();

        let watch = service.watch();
        assert!(watch.is_registered("paint"));
        {
            let reg = service.shared.reg.lock();
            assert_eq!(reg.table.get("paint").unwrap().len(), 2);
        }
        drop(watch);

        // One remove still leaves the other occurrence registered.
        service
            .dispatch(&register("5:1", 2, "remove", "paint\n"), &mut out)
            .unwrap();
        assert_eq!(listing(&mut service), "paint\n");
    }

    #[test]
    fn test_close_drops_emptied_entries() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\nkeyboard\n"), &mut out)
            .unwrap();
        service
            .dispatch(&register("6:1", 1, "add", "keyboard\n"), &mut out)
            .unwrap();

        service.dispatch(&close_notice("5:1"), &mut out).unwrap();

        // paint lost its only client and is gone entirely; keyboard keeps
        // its remaining client.
        assert_eq!(listing(&mut service), "keyboard\n");
    }

    #[test]
    fn test_batch_registration_is_atomic_to_listing() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "a\nb\nc\n"), &mut out)
            .unwrap();
        assert_eq!(listing(&mut service), "a\nb\nc\n");
    }

    #[test]
    fn test_wait_notified_once_commands_register() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("9:1", 7, "wait", "paint\nkeyboard\n"), &mut out)
            .unwrap();
        assert!(out.is_empty());

        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        assert!(out.is_empty(), "half-satisfied waiter must stay parked");

        service
            .dispatch(&register("5:1", 1, "add", "keyboard\n"), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("To: 9:1\nIn response to: 7\nMessage ID: "));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_wait_on_registered_commands_answers_immediately() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();

        let mut reply = Vec::new();
        service
            .dispatch(&register("9:1", 3, "wait", "paint\n"), &mut reply)
            .unwrap();
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("To: 9:1\nIn response to: 3\n"));
    }

    #[test]
    fn test_wait_parks_with_membership_taken_at_park_time() {
        // A waiter parks with exactly the commands still missing when the
        // table is inspected, and the table cannot change between that
        // inspection and the park. The single missing command waking it is
        // the observable consequence.
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        service
            .dispatch(&register("9:1", 7, "wait", "paint\nkeyboard\n"), &mut out)
            .unwrap();
        assert!(out.is_empty());

        {
            let reg = service.shared.reg.lock();
            let parked: Vec<_> = reg.waiters.iter().map(|(_, w)| w).collect();
            assert_eq!(parked.len(), 1);
            assert_eq!(parked[0].pending, vec!["keyboard".to_string()]);
        }

        service
            .dispatch(&register("5:1", 1, "add", "keyboard\n"), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("To: 9:1\nIn response to: 7\n"));
    }

    #[test]
    fn test_closed_client_waiters_are_dropped() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("9:1", 7, "wait", "paint\n"), &mut out)
            .unwrap();
        service.dispatch(&close_notice("9:1"), &mut out).unwrap();

        // The registration that would have satisfied the waiter produces no
        // notification; there is no one left to tell.
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_watch_wakes_on_registration() {
        let mut service = RegistryService::new();
        let watch = service.watch();

        let handle = std::thread::spawn(move || {
            watch.await_commands(&["paint".to_string()]);
            watch.commands()
        });

        // The watcher may or may not have parked yet; the predicate check
        // inside await_commands makes either interleaving safe.
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();

        let seen = handle.join().unwrap();
        assert_eq!(seen, vec!["paint".to_string()]);
    }

    #[test]
    fn test_suspend_blocked_by_live_watch() {
        let service = RegistryService::new();
        let watch = service.watch();
        assert!(matches!(service.suspend(), Err(Error::WatchersActive)));
        drop(watch);
    }

    #[test]
    fn test_suspend_resume_preserves_listing_and_ids() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\nkeyboard\n"), &mut out)
            .unwrap();
        let before = listing(&mut service);
        let id_probe = service.next_message_id;
        service.connected = true;

        let blob = service.suspend().unwrap();
        let mut revived = RegistryService::resume(&blob).unwrap();

        assert_eq!(listing(&mut revived), before);
        assert_eq!(revived.next_message_id, id_probe + 1);
        assert!(revived.connected);
    }

    #[test]
    fn test_suspend_resume_with_mid_read_message() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();

        // Park a partially received message in the channel: headers done,
        // one of three payload bytes read, then the stream dries up.
        let mut stream = std::io::Cursor::new(b"Length: 3\n\na".to_vec());
        assert!(matches!(
            service.channel.read_message(&mut stream),
            Err(Error::ConnectionReset)
        ));
        assert_eq!(service.channel.remaining_payload(), 2);
        let before = listing(&mut service);

        let blob = service.suspend().unwrap();
        let mut revived = RegistryService::resume(&blob).unwrap();

        assert_eq!(revived.channel.remaining_payload(), 2);
        assert_eq!(listing(&mut revived), before);

        // The rest of the payload completes the transplanted message.
        let mut rest = std::io::Cursor::new(b"bc".to_vec());
        let msg = revived.channel.read_message(&mut rest).unwrap();
        assert_eq!(msg.payload, b"abc");
    }

    #[test]
    fn test_resume_rejects_truncated_blob() {
        let mut service = RegistryService::new();
        let mut out = Vec::new();
        service
            .dispatch(&register("5:1", 0, "add", "paint\n"), &mut out)
            .unwrap();
        let blob = service.suspend().unwrap();

        assert!(RegistryService::resume(&blob[..blob.len() - 3]).is_err());
    }

    #[test]
    fn test_message_id_wraps_at_int32_max() {
        let mut service = RegistryService::new();
        service.next_message_id = i32::MAX;
        assert_eq!(service.take_message_id(), i32::MAX);
        assert_eq!(service.take_message_id(), 0);
    }
}
