// SPDX-License-Identifier: Apache-2.0 OR MIT

//! String-keyed registry table mapping command names to client sets.
//!
//! Command names are unique keys owned by the table; a command absent from
//! the table means "no server currently implements it". Enumeration is in
//! insertion order, which keeps listings and the marshaled form stable
//! across a state transplant.

use std::collections::HashMap;

use crate::client_set::ClientSet;
use crate::marshal::{Cursor, CursorMut, Marshal, MarshalError, MarshalResult};

/// Tuned initial capacity for the registry's workload.
pub const DEFAULT_CAPACITY: usize = 32;

/// Map from command name to the set of clients implementing it.
#[derive(Debug, Default)]
pub struct RegistryTable {
    map: HashMap<String, ClientSet>,
    /// Keys in insertion order; kept in sync with `map`.
    order: Vec<String>,
}

impl RegistryTable {
    /// Create a table with the tuned default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a table with at least `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        RegistryTable {
            map: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
        }
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether `command` is registered.
    pub fn contains(&self, command: &str) -> bool {
        self.map.contains_key(command)
    }

    /// Borrow the client set for `command`.
    pub fn get(&self, command: &str) -> Option<&ClientSet> {
        self.map.get(command)
    }

    /// Mutably borrow the client set for `command`.
    pub fn get_mut(&mut self, command: &str) -> Option<&mut ClientSet> {
        self.map.get_mut(command)
    }

    /// Insert a command with its client set, replacing any previous entry
    /// (the original insertion position is kept on replacement).
    pub fn insert(&mut self, command: String, clients: ClientSet) {
        if self.map.insert(command.clone(), clients).is_none() {
            self.order.push(command);
        }
    }

    /// Remove a command entirely, returning its client set.
    pub fn remove(&mut self, command: &str) -> Option<ClientSet> {
        let set = self.map.remove(command)?;
        self.order.retain(|k| k != command);
        Some(set)
    }

    /// Enumerate `(command, clients)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClientSet)> {
        self.order
            .iter()
            .map(|k| (k.as_str(), &self.map[k]))
    }

    /// Enumerate the command names in insertion order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl Marshal for RegistryTable {
    fn marshaled_size(&self) -> usize {
        let mut size = 8 + 8;
        for (command, clients) in self.iter() {
            size += command.len() + 1 + 8 + clients.marshaled_size();
        }
        size
    }

    fn marshal(mut self, out: &mut CursorMut<'_>) -> MarshalResult<()> {
        out.write_size(self.map.capacity())?;
        out.write_size(self.map.len())?;
        for command in std::mem::take(&mut self.order) {
            let clients = self.map.remove(&command).expect("key missing from map");
            out.write_cstr(&command)?;
            out.write_size(clients.marshaled_size())?;
            clients.marshal(out)?;
        }
        Ok(())
    }

    fn unmarshal(data: &mut Cursor<'_>) -> MarshalResult<Self> {
        let capacity = data.read_size()?;
        let size = data.read_size()?;
        if size > data.remaining() {
            return Err(MarshalError::BadLength {
                offset: data.offset(),
                value: size as u64,
            });
        }
        let mut table = RegistryTable::with_capacity(capacity.max(DEFAULT_CAPACITY));
        for _ in 0..size {
            let command = data.read_cstr()?;
            let _clients_size = data.read_size()?;
            let clients = ClientSet::unmarshal(data)?;
            table.insert(command, clients);
        }
        Ok(table)
    }
}
