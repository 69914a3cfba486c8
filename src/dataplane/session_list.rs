//! LRU-ordered session list
//!
//! A circular doubly-linked list stored in an arena of slots. Slot 0 is the
//! anchor: `anchor.next` is the least recently used entry and `anchor.prev`
//! the most recently used one. Links are slot indices, so moving an entry to
//! the tail or removing it from the middle is O(1) without shared ownership.

use super::entry::Entry;

const ANCHOR: usize = 0;

/// Stable handle to an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug)]
struct Slot {
    prev: usize,
    next: usize,
    entry: Option<Entry>,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            prev: ANCHOR,
            next: ANCHOR,
            entry: None,
        }
    }
}

#[derive(Debug)]
pub struct SessionList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

impl SessionList {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::vacant()],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store `entry` at the tail and stamp its `last_access` with `now`.
    pub fn link(&mut self, mut entry: Entry, now: u64) -> SlotId {
        entry.touch(now);

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot::vacant());
                self.slots.len() - 1
            }
        };

        self.slots[idx].entry = Some(entry);
        self.attach_tail(idx);
        self.len += 1;
        SlotId(idx)
    }

    /// Move an entry to the tail and stamp its `last_access` with `now`.
    pub fn relink(&mut self, id: SlotId, now: u64) {
        debug_assert!(self.slots[id.0].entry.is_some(), "relink of vacant slot");
        self.detach(id.0);
        if let Some(entry) = self.slots[id.0].entry.as_mut() {
            entry.touch(now);
        }
        self.attach_tail(id.0);
    }

    /// Remove an entry from wherever it sits and release its slot.
    pub fn unlink(&mut self, id: SlotId) -> Option<Entry> {
        let entry = self.slots.get_mut(id.0)?.entry.take()?;
        self.detach(id.0);
        self.free.push(id.0);
        self.len -= 1;
        Some(entry)
    }

    /// Least recently used entry
    pub fn head(&self) -> Option<(SlotId, &Entry)> {
        let idx = self.slots[ANCHOR].next;
        if idx == ANCHOR {
            return None;
        }
        self.slots[idx].entry.as_ref().map(|e| (SlotId(idx), e))
    }

    pub fn get(&self, id: SlotId) -> Option<&Entry> {
        self.slots.get(id.0)?.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Entry> {
        self.slots.get_mut(id.0)?.entry.as_mut()
    }

    /// Entries from least to most recently used
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.slots[ANCHOR].next,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn attach_tail(&mut self, idx: usize) {
        let tail = self.slots[ANCHOR].prev;
        self.slots[tail].next = idx;
        self.slots[idx].prev = tail;
        self.slots[idx].next = ANCHOR;
        self.slots[ANCHOR].prev = idx;
    }

    fn detach(&mut self, idx: usize) {
        debug_assert_ne!(idx, ANCHOR, "anchor cannot be detached");
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[idx].prev = ANCHOR;
        self.slots[idx].next = ANCHOR;
    }
}

impl Default for SessionList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    list: &'a SessionList,
    cursor: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == ANCHOR {
            return None;
        }
        let slot = &self.list.slots[self.cursor];
        self.cursor = slot.next;
        slot.entry.as_ref()
    }
}
