//! Generational handles for nodes and graphs.

use std::fmt;

/// Slot index plus the generation the slot had when the handle was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RawId {
    index: u32,
    generation: u32,
}

impl RawId {
    const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(RawId);

        impl $name {
            /// A handle that never refers to a live object.
            pub const INVALID: Self = Self(RawId::INVALID);

            pub(crate) fn from_raw(raw: RawId) -> Self {
                Self(raw)
            }

            pub(crate) fn raw(self) -> RawId {
                self.0
            }

            /// Slot index, used by the tick sort key and the slot tables.
            pub(crate) fn index(self) -> usize {
                self.0.index as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({}v{})"), self.0.index, self.0.generation)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

handle!(
    /// Handle to a node slot in a [`GraphContext`](crate::GraphContext).
    ///
    /// Two handles are equal only if both the slot index and the generation
    /// match, so a handle to a destroyed node never compares equal to the
    /// handle of a node that later reuses the slot.
    NodeId,
    "NodeId"
);

handle!(
    /// Handle to a graph in the context's graph pool.
    GraphId,
    "GraphId"
);

/// Bounded allocator of generational slot ids.
///
/// Released slots go onto a LIFO free list and come back with a bumped
/// generation, invalidating every handle issued for the previous occupant.
pub(crate) struct IdAllocator {
    /// Current generation per slot.
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_list: Vec<u32>,
    count: usize,
    capacity: usize,
}

impl IdAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            generations: Vec::with_capacity(capacity),
            alive: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            count: 0,
            capacity,
        }
    }

    /// Allocates a slot, or `None` when every slot is live.
    pub fn allocate(&mut self) -> Option<RawId> {
        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            self.alive[idx] = true;
            self.count += 1;
            return Some(RawId {
                index,
                generation: self.generations[idx],
            });
        }

        if self.generations.len() >= self.capacity {
            return None;
        }

        let index = self.generations.len() as u32;
        self.generations.push(1);
        self.alive.push(true);
        self.count += 1;
        Some(RawId {
            index,
            generation: 1,
        })
    }

    /// Releases a slot. Returns false if the id is stale or was never issued.
    pub fn release(&mut self, id: RawId) -> bool {
        if !self.is_alive(id) {
            return false;
        }

        let idx = id.index as usize;
        self.alive[idx] = false;
        // Generation 0 is reserved for INVALID.
        self.generations[idx] = match self.generations[idx].wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free_list.push(id.index);
        self.count -= 1;
        true
    }

    pub fn is_alive(&self, id: RawId) -> bool {
        let idx = id.index as usize;
        idx < self.alive.len() && self.alive[idx] && self.generations[idx] == id.generation
    }

    /// Ids of every live slot, in slot order.
    pub fn live(&self) -> impl Iterator<Item = RawId> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(idx, _)| RawId {
                index: idx as u32,
                generation: self.generations[idx],
            })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocate_sequential() {
        let mut alloc = IdAllocator::new(8);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        let c = alloc.allocate().unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(c.index, 2);
        assert_eq!(alloc.count(), 3);
    }

    #[test]
    fn release_and_reuse_bumps_generation() {
        let mut alloc = IdAllocator::new(8);
        let a = alloc.allocate().unwrap();
        assert!(alloc.release(a));
        let b = alloc.allocate().unwrap();
        assert_eq!(b.index, a.index);
        assert_ne!(a, b);
        assert!(!alloc.is_alive(a));
        assert!(alloc.is_alive(b));
    }

    #[test]
    fn double_release_fails() {
        let mut alloc = IdAllocator::new(8);
        let a = alloc.allocate().unwrap();
        assert!(alloc.release(a));
        assert!(!alloc.release(a));
        assert_eq!(alloc.count(), 0);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut alloc = IdAllocator::new(2);
        let a = alloc.allocate().unwrap();
        assert!(alloc.allocate().is_some());
        assert!(alloc.allocate().is_none());

        alloc.release(a);
        assert!(alloc.allocate().is_some());
        assert_eq!(alloc.count(), alloc.capacity());
    }

    #[test]
    fn invalid_is_never_alive() {
        let mut alloc = IdAllocator::new(4);
        alloc.allocate();
        assert!(!alloc.is_alive(RawId::INVALID));
        assert!(!alloc.is_alive(NodeId::INVALID.raw()));
    }

    #[test]
    fn live_lists_only_alive_slots() {
        let mut alloc = IdAllocator::new(4);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        let c = alloc.allocate().unwrap();
        alloc.release(b);

        let live: Vec<RawId> = alloc.live().collect();
        assert_eq!(live, vec![a, c]);
    }

    #[test]
    fn handles_hash_by_generation() {
        let mut alloc = IdAllocator::new(4);
        let a = NodeId::from_raw(alloc.allocate().unwrap());
        alloc.release(a.raw());
        let b = NodeId::from_raw(alloc.allocate().unwrap());

        let set: HashSet<NodeId> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn handle_debug_format() {
        let raw = RawId {
            index: 42,
            generation: 3,
        };
        assert_eq!(format!("{:?}", NodeId::from_raw(raw)), "NodeId(42v3)");
        assert_eq!(format!("{}", GraphId::from_raw(raw)), "GraphId(42v3)");
        assert_eq!(NodeId::default(), NodeId::INVALID);
    }
}
