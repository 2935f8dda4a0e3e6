//! o5m string back-reference tables.

use std::collections::HashMap;

/// Number of strings (or string pairs) a table remembers.
pub const TABLE_SIZE: usize = 15000;
/// Longer strings are written inline every time and never referenced.
pub const MAX_STORED_LEN: usize = 250;

/// Decoder side: a ring of raw string slices, newest referenced as 1.
pub struct StringRing<'a> {
    slots: Vec<&'a [u8]>,
    next: usize,
    filled: usize,
}

impl<'a> StringRing<'a> {
    pub fn new() -> Self {
        Self {
            slots: vec![&[][..]; TABLE_SIZE],
            next: 0,
            filled: 0,
        }
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.filled = 0;
    }

    pub fn push(&mut self, raw: &'a [u8]) {
        self.slots[self.next] = raw;
        self.next = (self.next + 1) % TABLE_SIZE;
        self.filled = (self.filled + 1).min(TABLE_SIZE);
    }

    pub fn get(&self, reference: u64) -> Option<&'a [u8]> {
        let reference = usize::try_from(reference).ok()?;
        if reference == 0 || reference > self.filled {
            return None;
        }
        Some(self.slots[(self.next + TABLE_SIZE - reference) % TABLE_SIZE])
    }
}

/// Encoder side: maps stored strings to ring slots so repeats can be
/// written as back-references.
pub struct StringTable {
    index: HashMap<Vec<u8>, usize>,
    slots: Vec<Option<Vec<u8>>>,
    next: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: vec![None; TABLE_SIZE],
            next: 0,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
    }

    /// Back-reference for an already stored string.
    pub fn lookup(&self, raw: &[u8]) -> Option<u64> {
        let slot = *self.index.get(raw)?;
        let distance = (self.next + TABLE_SIZE - slot) % TABLE_SIZE;
        let reference = if distance == 0 { TABLE_SIZE } else { distance };
        Some(reference as u64)
    }

    /// Stores `raw` if its payload is short enough, evicting the oldest entry.
    pub fn insert(&mut self, raw: Vec<u8>, payload_len: usize) {
        if payload_len > MAX_STORED_LEN {
            return;
        }
        if let Some(old) = self.slots[self.next].take() {
            self.index.remove(&old);
        }
        self.index.insert(raw.clone(), self.next);
        self.slots[self.next] = Some(raw);
        self.next = (self.next + 1) % TABLE_SIZE;
    }
}
