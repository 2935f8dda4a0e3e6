use anyhow::{Context, Result};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

use super::MembershipStore;
use crate::model::Kind;

/// Relation hierarchies deeper than this are not fully resolved.
pub const MAX_HIERARCHY_PASSES: usize = 12;

// 16 bytes per edge: 8 bytes parent relation id, 8 bytes member relation id
const EDGE_SIZE: usize = 16;

/// Relation-to-relation membership edges, spilled to a temporary file so
/// the closure can be replayed without holding them in memory.
pub struct EdgeSpill {
    writer: BufWriter<NamedTempFile>,
    count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureOutcome {
    pub passes: usize,
    /// False when the pass limit was reached with changes still happening.
    pub converged: bool,
}

impl EdgeSpill {
    pub fn new() -> Result<Self> {
        let temp_file =
            NamedTempFile::new().context("EdgeSpill: Failed to create temporary edge file")?;
        Ok(Self {
            writer: BufWriter::new(temp_file),
            count: 0,
        })
    }

    pub fn push(&mut self, relation: i64, member: i64) -> Result<()> {
        self.writer
            .write_all(&relation.to_le_bytes())
            .and_then(|_| self.writer.write_all(&member.to_le_bytes()))
            .context("EdgeSpill: Failed to write edge")?;
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    /// Replay every edge in insertion order.
    fn for_each_edge(&mut self, mut f: impl FnMut(i64, i64)) -> Result<()> {
        self.writer
            .flush()
            .context("EdgeSpill: Failed to flush edge file")?;
        let file = self.writer.get_mut().as_file_mut();
        file.seek(SeekFrom::Start(0))
            .context("EdgeSpill: Failed to rewind edge file")?;
        let mut reader = BufReader::new(file);
        let mut record = [0u8; EDGE_SIZE];
        for _ in 0..self.count {
            reader
                .read_exact(&mut record)
                .context("EdgeSpill: Failed to read edge")?;
            let (relation, member) = record.split_at(8);
            let relation = i64::from_le_bytes(relation.try_into()?);
            let member = i64::from_le_bytes(member.try_into()?);
            f(relation, member);
        }
        let file = reader.into_inner();
        file.seek(SeekFrom::End(0))
            .context("EdgeSpill: Failed to seek edge file")?;
        Ok(())
    }

    /// Propagate marks from relations to their member relations until
    /// nothing changes or the pass limit is hit.
    pub fn close_relations(
        &mut self,
        store: &mut MembershipStore,
        max_passes: usize,
    ) -> Result<ClosureOutcome> {
        let mut passes = 0;
        while passes < max_passes {
            passes += 1;
            let mut changed = 0u64;
            self.for_each_edge(|relation, member| {
                if store.test(Kind::Relation, relation) && store.mark_relation_if_not_negative(member)
                {
                    changed += 1;
                }
            })?;
            tracing::debug!("Interrelational hierarchy {}: {} dependencies.", passes, changed);
            if changed == 0 {
                return Ok(ClosureOutcome {
                    passes,
                    converged: true,
                });
            }
        }
        Ok(ClosureOutcome {
            passes,
            converged: false,
        })
    }
}
