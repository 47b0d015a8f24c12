// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Growable ordered collection of client identifiers.
//!
//! Not a mathematical set: duplicates are permitted and preserved. `add`
//! appends; `remove` deletes the first matching occurrence and shifts later
//! elements down, keeping the relative order of the rest. Backing capacity
//! is a power of two, doubling on overflow and halving whenever size drops
//! to half the capacity after a removal, but never below the default
//! minimum. A set that becomes empty after a removal is the owning table's
//! cue to drop the whole entry.

use crate::client_id::ClientId;
use crate::marshal::{Cursor, CursorMut, Marshal, MarshalError, MarshalResult};

/// Version tag for the marshaled form.
const CLIENT_SET_VERSION: i32 = 1;

/// The smallest capacity a set will shrink to.
pub const MIN_CAPACITY: usize = 8;

/// An ordered multiset of [`ClientId`] values.
#[derive(Debug, Clone)]
pub struct ClientSet {
    ids: Vec<ClientId>,
    capacity: usize,
}

fn to_power_of_two(value: usize) -> usize {
    value.next_power_of_two()
}

impl ClientSet {
    /// Create a set with at least `min_capacity` slots (0 for the default).
    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = to_power_of_two(min_capacity.max(MIN_CAPACITY));
        ClientSet {
            ids: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of stored identifiers, duplicates included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Current backing capacity (always a power of two).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a client. Doubles the backing capacity when full.
    pub fn add(&mut self, client: ClientId) {
        if self.ids.len() == self.capacity {
            self.capacity <<= 1;
            self.ids.reserve_exact(self.capacity - self.ids.len());
        }
        self.ids.push(client);
    }

    /// Remove the first occurrence of `client`, if present.
    ///
    /// Halves the backing capacity when size falls to half of it, but never
    /// below [`MIN_CAPACITY`].
    pub fn remove(&mut self, client: ClientId) {
        let Some(i) = self.ids.iter().position(|&c| c == client) else {
            return;
        };
        self.ids.remove(i);

        if self.ids.len() * 2 <= self.capacity && self.capacity > MIN_CAPACITY {
            self.capacity >>= 1;
            self.ids.shrink_to(self.capacity);
        }
    }

    /// Whether `client` occurs at least once.
    pub fn contains(&self, client: ClientId) -> bool {
        self.ids.contains(&client)
    }

    /// Iterate the identifiers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.ids.iter().copied()
    }
}

impl Marshal for ClientSet {
    fn marshaled_size(&self) -> usize {
        crate::marshal::VERSION_TAG + 8 + 8 + self.ids.len() * 8
    }

    fn marshal(self, out: &mut CursorMut<'_>) -> MarshalResult<()> {
        out.write_i32(CLIENT_SET_VERSION)?;
        out.write_size(self.capacity)?;
        out.write_size(self.ids.len())?;
        for id in self.ids {
            out.write_u64(id.0)?;
        }
        Ok(())
    }

    fn unmarshal(data: &mut Cursor<'_>) -> MarshalResult<Self> {
        data.expect_version(CLIENT_SET_VERSION)?;
        let capacity = data.read_size()?;
        let size = data.read_size()?;
        if capacity > (isize::MAX as usize) / 8 || size > capacity {
            return Err(MarshalError::BadLength {
                offset: data.offset(),
                value: size as u64,
            });
        }
        let mut ids = Vec::with_capacity(capacity);
        for _ in 0..size {
            ids.push(ClientId(data.read_u64()?));
        }
        Ok(ClientSet { ids, capacity })
    }
}

impl Default for ClientSet {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{from_blob, to_blob};

    fn id(n: u32) -> ClientId {
        ClientId::from_parts(1, n)
    }

    #[test]
    fn test_add_and_remove_track_size() {
        let mut set = ClientSet::with_capacity(0);
        for n in 0..5 {
            set.add(id(n));
        }
        assert_eq!(set.len(), 5);

        set.remove(id(2));
        assert_eq!(set.len(), 4);
        // Relative order of the remainder is preserved.
        let rest: Vec<_> = set.iter().collect();
        assert_eq!(rest, vec![id(0), id(1), id(3), id(4)]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut set = ClientSet::with_capacity(0);
        set.add(id(1));
        set.remove(id(9));
        assert_eq!(set.len(), 1);

        // Removing the same id twice: the second remove is a no-op.
        set.remove(id(1));
        set.remove(id(1));
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicates_preserved_and_removed_once() {
        let mut set = ClientSet::with_capacity(0);
        set.add(id(7));
        set.add(id(7));
        assert_eq!(set.len(), 2);

        set.remove(id(7));
        assert_eq!(set.len(), 1);
        assert!(set.contains(id(7)));
    }

    #[test]
    fn test_capacity_doubles_and_halves() {
        let mut set = ClientSet::with_capacity(0);
        assert_eq!(set.capacity(), MIN_CAPACITY);

        for n in 0..9 {
            set.add(id(n));
        }
        assert_eq!(set.capacity(), MIN_CAPACITY * 2);

        // Dropping to half the capacity shrinks it back.
        set.remove(id(8));
        assert_eq!(set.capacity(), MIN_CAPACITY);

        // But never below the minimum.
        let mut small = ClientSet::with_capacity(0);
        small.add(id(1));
        small.remove(id(1));
        assert_eq!(small.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn test_marshal_round_trip() {
        let mut set = ClientSet::with_capacity(4);
        set.add(id(1));
        set.add(id(2));
        set.add(id(1));
        let capacity = set.capacity();

        let blob = to_blob(set).unwrap();
        let back: ClientSet = from_blob(&blob).unwrap();

        assert_eq!(back.capacity(), capacity);
        let ids: Vec<_> = back.iter().collect();
        assert_eq!(ids, vec![id(1), id(2), id(1)]);
    }

    #[test]
    fn test_unmarshal_rejects_corrupt_lengths() {
        let mut set = ClientSet::with_capacity(0);
        set.add(id(1));
        let mut blob = to_blob(set).unwrap();
        // Clobber the size field with something bigger than the capacity.
        blob[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(from_blob::<ClientSet>(&blob).is_err());
    }
}
