use anyhow::{Result, anyhow};
use memmap2::{MmapMut, MmapOptions};

use crate::model::Kind;

mod spill;

pub use spill::{ClosureOutcome, EdgeSpill, MAX_HIERARCHY_PASSES};

const MIB: usize = 1024 * 1024;
/// Budgets are clamped to this many MiB per table.
const MAX_TABLE_MIB: u32 = 4000;
/// Halving stops below this many bytes.
const MIN_TABLE_BYTES: usize = 1024;

/// Whether the requested budget could be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Full,
    Reduced,
}

/// One bit per (hashed) object id and kind, plus a second relation table
/// for relations that must never be pulled in as dependencies.
///
/// Ids that collide modulo the table size share a bit, so lookups may
/// report false positives but never false negatives.
pub struct MembershipStore {
    nodes: MmapMut,
    ways: MmapMut,
    /// Positive half followed by the negative half, each `relation_len` bytes.
    relations: MmapMut,
    relation_len: usize,
}

/// Anonymous mappings are zero-filled and only backed once touched.
fn allocate(mib: u32, halves: usize, reduced: &mut bool) -> Option<(MmapMut, usize)> {
    let mut len = mib.clamp(1, MAX_TABLE_MIB) as usize * MIB;
    while len >= MIN_TABLE_BYTES {
        match MmapOptions::new().len(len * halves).map_anon() {
            Ok(map) => return Some((map, len)),
            Err(e) => {
                tracing::debug!("MembershipStore: Could not map {} bytes: {}", len * halves, e);
                len /= 2;
                *reduced = true;
            }
        }
    }
    None
}

fn slot(id: i64, len: usize) -> (usize, u8) {
    let idx = i128::from(id) + ((len as i128) << 3);
    let bit = (idx & 7) as u8;
    let byte = (idx >> 3).rem_euclid(len as i128) as usize;
    (byte, 1 << bit)
}

impl MembershipStore {
    /// Allocate tables of the given sizes in MiB, halving on failure.
    pub fn init(nodes: u32, ways: u32, relations: u32) -> Result<(Self, InitOutcome)> {
        let mut reduced = false;
        let (nodes, _) = allocate(nodes, 1, &mut reduced)
            .ok_or_else(|| anyhow!("MembershipStore: Could not allocate node hash table"))?;
        let (ways, _) = allocate(ways, 1, &mut reduced)
            .ok_or_else(|| anyhow!("MembershipStore: Could not allocate way hash table"))?;
        let (relations, relation_len) = allocate(relations, 2, &mut reduced)
            .ok_or_else(|| anyhow!("MembershipStore: Could not allocate relation hash tables"))?;
        tracing::debug!(
            "Hash tables: {} / {} / {} bytes",
            nodes.len(),
            ways.len(),
            relation_len
        );
        let outcome = if reduced {
            InitOutcome::Reduced
        } else {
            InitOutcome::Full
        };
        Ok((
            Self {
                nodes,
                ways,
                relations,
                relation_len,
            },
            outcome,
        ))
    }

    fn table(&self, kind: Kind) -> &[u8] {
        match kind {
            Kind::Node => &self.nodes[..],
            Kind::Way => &self.ways[..],
            Kind::Relation => &self.relations[..self.relation_len],
        }
    }

    fn table_mut(&mut self, kind: Kind) -> &mut [u8] {
        match kind {
            Kind::Node => &mut self.nodes[..],
            Kind::Way => &mut self.ways[..],
            Kind::Relation => &mut self.relations[..self.relation_len],
        }
    }

    pub fn mark(&mut self, kind: Kind, id: i64) {
        let table = self.table_mut(kind);
        let (byte, mask) = slot(id, table.len());
        table[byte] |= mask;
    }

    pub fn test(&self, kind: Kind, id: i64) -> bool {
        let table = self.table(kind);
        let (byte, mask) = slot(id, table.len());
        table[byte] & mask != 0
    }

    pub fn mark_negative(&mut self, id: i64) {
        let len = self.relation_len;
        let (byte, mask) = slot(id, len);
        self.relations[len + byte] |= mask;
    }

    pub fn is_negative(&self, id: i64) -> bool {
        let len = self.relation_len;
        let (byte, mask) = slot(id, len);
        self.relations[len + byte] & mask != 0
    }

    /// Mark a relation unless it is flagged negative. Returns true only if
    /// the positive bit was newly set.
    pub fn mark_relation_if_not_negative(&mut self, id: i64) -> bool {
        if self.is_negative(id) {
            return false;
        }
        let (byte, mask) = slot(id, self.relation_len);
        let was_clear = self.relations[byte] & mask == 0;
        self.relations[byte] |= mask;
        was_clear
    }
}
