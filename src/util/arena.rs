//! Generational arena for runtime records.
//!
//! Holds the records that other structures refer to by index rather than by
//! pointer: cancellation sources (so a parent/child link is a pair of
//! indices, not an `Rc` cycle) and executor tasks.
//!
//! A slot's generation is bumped every time it is vacated, so an index held
//! past the removal of its record resolves to `None` instead of aliasing a
//! newer occupant.

use core::fmt;

/// Index into an [`Arena`], tagged with the generation it was issued for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index from raw parts.
    #[inline]
    #[must_use]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Slot position inside the arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.slot
    }

    /// Generation the index was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.slot, self.generation)
    }
}

#[derive(Debug)]
enum Entry<T> {
    Live { generation: u32, value: T },
    Free { generation: u32, next: Option<u32> },
}

impl<T> Entry<T> {
    const fn generation(&self) -> u32 {
        match self {
            Self::Live { generation, .. } | Self::Free { generation, .. } => *generation,
        }
    }
}

/// Slot storage with a free list and per-slot generations.
#[derive(Debug)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Option<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: None,
            live: 0,
        }
    }

    /// Number of live records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Returns true when no record is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores `value` and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `f`, which is told the index it will live at.
    ///
    /// If `f` panics the arena is left unchanged.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        match self.free {
            Some(slot) => {
                let (generation, next) = match &self.entries[slot as usize] {
                    Entry::Free { generation, next } => (*generation, *next),
                    Entry::Live { .. } => unreachable!("free list points at a live slot"),
                };
                let index = ArenaIndex::new(slot, generation);
                let value = f(index);
                self.entries[slot as usize] = Entry::Live { generation, value };
                self.free = next;
                self.live += 1;
                index
            }
            None => {
                let slot = u32::try_from(self.entries.len()).expect("arena overflow");
                let index = ArenaIndex::new(slot, 0);
                let value = f(index);
                self.entries.push(Entry::Live {
                    generation: 0,
                    value,
                });
                self.live += 1;
                index
            }
        }
    }

    /// Removes and returns the record at `index`, if it is still live.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.entries.get_mut(index.slot as usize)?;
        if !matches!(entry, Entry::Live { generation, .. } if *generation == index.generation) {
            return None;
        }
        let vacated = core::mem::replace(
            entry,
            Entry::Free {
                generation: index.generation.wrapping_add(1),
                next: self.free,
            },
        );
        self.free = Some(index.slot);
        self.live -= 1;
        match vacated {
            Entry::Live { value, .. } => Some(value),
            Entry::Free { .. } => None,
        }
    }

    /// Shared access to a live record.
    #[inline]
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.entries.get(index.slot as usize)? {
            Entry::Live { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Exclusive access to a live record.
    #[inline]
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.entries.get_mut(index.slot as usize)? {
            Entry::Live { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true if `index` still refers to a live record.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Entry::Live { generation, value } => {
                    Some((ArenaIndex::new(slot as u32, *generation), value))
                }
                Entry::Free { .. } => None,
            })
    }

    /// Indices of all live records, in slot order.
    #[must_use]
    pub fn indices(&self) -> Vec<ArenaIndex> {
        self.iter().map(|(index, _)| index).collect()
    }

    /// Generation the next occupant of `slot` would receive.
    #[cfg(test)]
    fn slot_generation(&self, slot: u32) -> Option<u32> {
        self.entries.get(slot as usize).map(Entry::generation)
    }
}
