//! Generation-tagged slot arena.
//!
//! Objects are stored in slots addressed by a stable [`Handle`]. Removing an
//! object frees its slot for reuse, but bumps the slot's generation so any
//! handle issued for the old occupant stops resolving. This replaces the
//! classic dataplane pattern of a global pool indexed by raw integers, where
//! a stale index silently resolves to whatever object reused the slot.

/// A stable reference to an arena slot.
///
/// A handle resolves only while the object it was issued for is alive;
/// after `remove`, lookups through the old handle return `None` even if the
/// slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Raw slot index, for diagnostics only.
    pub const fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// An arena of slots with generation-tagged handles.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no objects are live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            Handle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle {
                index,
                generation: 0,
            }
        }
    }

    /// Removes the value behind `handle`, freeing its slot.
    ///
    /// Returns `None` if the handle is stale or was never issued.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        // Invalidate outstanding handles to this slot before reuse.
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        value
    }

    /// Resolves a handle to a shared reference.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Resolves a handle to a mutable reference.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Returns true if `handle` resolves to a live object.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Iterates over live objects in slot order.
    ///
    /// The traversal is stable between mutations but carries no other
    /// ordering guarantee.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let h = arena.insert("a");

        assert_eq!(arena.get(h), Some(&"a"));
        assert_eq!(arena.len(), 1);

        assert_eq!(arena.remove(h), Some("a"));
        assert!(arena.is_empty());
        assert_eq!(arena.get(h), None);
    }

    #[test]
    fn test_stale_handle_does_not_resolve_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);

        // Reuses the freed slot, but with a newer generation.
        let new = arena.insert(2);
        assert_eq!(new.index(), old.index());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut arena = Arena::new();
        let h = arena.insert(7);
        assert_eq!(arena.remove(h), Some(7));
        assert_eq!(arena.remove(h), None);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_iter_skips_freed_slots() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let _b = arena.insert("b");
        let c = arena.insert("c");
        arena.remove(a);
        arena.remove(c);

        let live: Vec<&&str> = arena.iter().map(|(_, v)| v).collect();
        assert_eq!(live, vec![&"b"]);
    }

    #[test]
    fn test_get_mut() {
        let mut arena = Arena::new();
        let h = arena.insert(10);
        *arena.get_mut(h).unwrap() += 5;
        assert_eq!(arena.get(h), Some(&15));
    }
}
