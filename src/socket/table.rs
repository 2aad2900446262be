//! Fixed-capacity socket registry with recency-ranked selection.
//!
//! The table owns N slots. Each live slot carries an identity, a rank
//! taken from a counter that only ever grows, and the entry payload.
//! One identity may be marked current; closing it hands "current" to
//! the survivor with the highest rank.
//!
//! # Example
//!
//! ```ignore
//! let mut table = SocketTable::new(2);
//! let slot = table.allocate()?;
//! table.fill(slot, SocketId::next(), entry);
//! assert_eq!(table.current(), Some(id));
//! ```

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::SocketId;

// ============================================================================
// Types
// ============================================================================

/// Index of a reserved, still empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndex(usize);

/// One live row.
#[derive(Debug)]
struct Slot<T> {
    id: SocketId,
    rank: u64,
    value: T,
}

// ============================================================================
// SocketTable
// ============================================================================

/// Arena of `capacity` slots plus the current selection.
#[derive(Debug)]
pub struct SocketTable<T> {
    slots: Vec<Option<Slot<T>>>,
    current: Option<SocketId>,
    next_rank: u64,
}

impl<T> SocketTable<T> {
    /// Creates an empty table with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            current: None,
            next_rank: 0,
        }
    }

    /// Reserves a free slot.
    ///
    /// Never blocks; the slot stays free until [`fill`](Self::fill).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableFull`] when every slot is live.
    pub fn allocate(&self) -> Result<SlotIndex> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(SlotIndex)
            .ok_or_else(|| Error::table_full(self.slots.len()))
    }

    /// Stores `value` under `id` in a reserved slot and makes it current.
    ///
    /// Returns the rank assigned to the entry.
    pub fn fill(&mut self, slot: SlotIndex, id: SocketId, value: T) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        self.slots[slot.0] = Some(Slot { id, rank, value });
        self.current = Some(id);
        trace!(%id, rank, slot = slot.0, "Slot filled");
        rank
    }

    /// Returns `true` if `id` names a live entry.
    #[inline]
    #[must_use]
    pub fn is_live(&self, id: SocketId) -> bool {
        self.position(id).is_some()
    }

    /// Current identity, if any.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<SocketId> {
        self.current
    }

    /// Makes a live `id` current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotFound`] if `id` is not live.
    pub fn select(&mut self, id: SocketId) -> Result<()> {
        if !self.is_live(id) {
            return Err(Error::socket_not_found(id));
        }
        self.current = Some(id);
        Ok(())
    }

    /// Removes `id` and returns its payload.
    ///
    /// If `id` was current, the survivor with the highest rank becomes
    /// current, or nothing when the table is empty.
    pub fn remove(&mut self, id: SocketId) -> Option<T> {
        let index = self.position(id)?;
        let slot = self.slots[index].take()?;

        if self.current == Some(id) {
            self.current = self
                .slots
                .iter()
                .flatten()
                .max_by_key(|slot| slot.rank)
                .map(|slot| slot.id);
            trace!(closed = %id, current = ?self.current, "Reselected current");
        }

        Some(slot.value)
    }

    /// Payload of `id`.
    #[must_use]
    pub fn get(&self, id: SocketId) -> Option<&T> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.id == id)
            .map(|slot| &slot.value)
    }

    /// Mutable payload of `id`.
    #[must_use]
    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.id == id)
            .map(|slot| &mut slot.value)
    }

    /// Rank of `id`.
    #[must_use]
    pub fn rank(&self, id: SocketId) -> Option<u64> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.id == id)
            .map(|slot| slot.rank)
    }

    /// Live entries in slot order as `(id, rank, payload)`.
    pub fn iter(&self) -> impl Iterator<Item = (SocketId, u64, &T)> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (slot.id, slot.rank, &slot.value))
    }

    /// Live identities in slot order.
    #[must_use]
    pub fn ids(&self) -> Vec<SocketId> {
        self.slots.iter().flatten().map(|slot| slot.id).collect()
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns `true` if no entry is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn position(&self, id: SocketId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|slot| slot.id == id))
    }
}

// ============================================================================
// Tests
// ============================================================================
