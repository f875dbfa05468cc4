// crates/preprovision-gate/src/ring.rs
// ============================================================================
// Module: Ring Buffer
// Description: Fixed-capacity circular buffer with overwrite-oldest semantics.
// Purpose: Retain a bounded window of recent entries without reallocation.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`RingBuffer`] stores at most `capacity` entries. Once full, each push
//! overwrites the oldest entry in place. Iteration is oldest-first.

/// Fixed-capacity circular buffer.
///
/// # Invariants
/// - `slots.len() <= capacity`.
/// - When full, `next` indexes the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Stored entries; grows to `capacity` then stays fixed.
    slots: Vec<T>,
    /// Maximum number of retained entries.
    capacity: usize,
    /// Slot written by the next push once the buffer is full.
    next: usize,
    /// Number of entries overwritten or dropped.
    evicted: u64,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            evicted: 0,
        }
    }

    /// Appends an entry, evicting the oldest one when full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            self.evicted = self.evicted.saturating_add(1);
            return;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else if let Some(slot) = self.slots.get_mut(self.next) {
            *slot = item;
            self.evicted = self.evicted.saturating_add(1);
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns how many entries have been evicted so far.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Iterates retained entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let split = if self.slots.len() < self.capacity { 0 } else { self.next };
        let (newer, older) = self.slots.split_at(split.min(self.slots.len()));
        older.iter().chain(newer.iter())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies retained entries from oldest to newest.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
