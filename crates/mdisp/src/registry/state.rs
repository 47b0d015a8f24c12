// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared registry state and the watch handle.
//!
//! The command table, the outstanding wait requests, and their condition
//! variable live behind one mutex. The message pump is the only mutator
//! today, but every read-modify-write goes through the lock so a second
//! thread (a watcher, or another connection) can be added without touching
//! the callers.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::arena::{ArenaList, EDGE};
use crate::client_id::ClientId;
use crate::table::RegistryTable;

/// An outstanding `Action: wait` request.
///
/// `pending` holds the command names the client asked for that were not yet
/// registered when the request arrived. Each successful registration strips
/// matching names; when the list empties the waiter is notified and dropped.
#[derive(Debug)]
pub(super) struct Waiter {
    pub client: ClientId,
    /// Message ID of the original request, echoed in `In response to`.
    pub in_response_to: String,
    pub pending: Vec<String>,
}

/// Registry state proper: the command table plus the wait list.
#[derive(Debug)]
pub(super) struct Registry {
    pub table: RegistryTable,
    pub waiters: ArenaList<Waiter>,
}

impl Registry {
    pub fn new(table: RegistryTable) -> Self {
        Registry {
            table,
            waiters: ArenaList::new(),
        }
    }

    /// Strip `command` from every waiter's pending list and detach the
    /// waiters that became fully satisfied. Call with the lock held.
    pub fn advance_waiters(&mut self, command: &str, satisfied: &mut Vec<Waiter>) {
        let mut node = self.waiters.next(EDGE);
        while node != EDGE {
            let after = self.waiters.next(node);
            let done = match self.waiters.get_mut(node) {
                Some(waiter) => {
                    waiter.pending.retain(|c| c != command);
                    waiter.pending.is_empty()
                }
                None => false,
            };
            if done {
                satisfied.push(self.waiters.remove(node));
            }
            node = after;
        }
    }

    /// Drop every waiter belonging to `client`. Used when that client's
    /// connection closes; there is no one left to notify.
    pub fn drop_waiters_of(&mut self, client: ClientId) {
        let mut node = self.waiters.next(EDGE);
        while node != EDGE {
            let after = self.waiters.next(node);
            if self.waiters.get(node).map(|w| w.client) == Some(client) {
                self.waiters.remove(node);
            }
            node = after;
        }
    }
}

/// Lock plus wakeup signal shared between the pump and any watchers.
#[derive(Debug)]
pub(super) struct Shared {
    pub reg: Mutex<Registry>,
    pub wakeup: Condvar,
}

impl Shared {
    pub fn new(table: RegistryTable) -> Self {
        Shared {
            reg: Mutex::new(Registry::new(table)),
            wakeup: Condvar::new(),
        }
    }
}

/// Read-side handle onto the registry, cloneable across threads.
///
/// Holding a watch blocks
/// [`RegistryService::suspend`](super::RegistryService::suspend): the
/// transplant needs exclusive access to the shared state.
#[derive(Debug, Clone)]
pub struct RegistryWatch {
    pub(super) shared: Arc<Shared>,
}

impl RegistryWatch {
    /// Whether `command` is currently registered.
    pub fn is_registered(&self, command: &str) -> bool {
        self.shared.reg.lock().table.contains(command)
    }

    /// Registered command names, in registration order.
    pub fn commands(&self) -> Vec<String> {
        self.shared
            .reg
            .lock()
            .table
            .commands()
            .map(str::to_owned)
            .collect()
    }

    /// Block until every name in `commands` is registered.
    pub fn await_commands(&self, commands: &[String]) {
        let mut reg = self.shared.reg.lock();
        while !commands.iter().all(|c| reg.table.contains(c)) {
            self.shared.wakeup.wait(&mut reg);
        }
    }
}
