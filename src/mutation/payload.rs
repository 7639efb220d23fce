//! The write payload exchanged between replicas.
//!
//! A [`Mutation`] targets one partition of one keyspace and carries one
//! [`PartitionUpdate`] per table it touches. Once built it is never
//! modified; replicas share it behind an `Arc`.

use std::sync::OnceLock;

use bytes::Bytes;

use crate::errors::VerbError;
use crate::messaging::{CURRENT_VERSION, VERSION_40};

/// Per-record overhead of the append log: length plus two checksums.
pub const COMMITLOG_ENTRY_OVERHEAD_SIZE: usize = 4 + 4 + 4;

/// A single column value, or a tombstone when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub column: String,
    pub value: Option<Bytes>,
    pub timestamp: i64,
}

impl Cell {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Cells written under one clustering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub clustering: Bytes,
    pub cells: Vec<Cell>,
}

/// All rows a mutation writes into one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUpdate {
    pub table: String,
    pub rows: Vec<Row>,
}

/// An immutable set of partition updates for a single partition key.
#[derive(Debug, Clone)]
pub struct Mutation {
    keyspace: String,
    key: Bytes,
    updates: Vec<PartitionUpdate>,
    /// Size at [`CURRENT_VERSION`], computed on first use.
    cached_size: OnceLock<usize>,
}

impl Mutation {
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn updates(&self) -> &[PartitionUpdate] {
        &self.updates
    }

    /// Partition key rendered for log lines.
    pub fn key_display(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }


    /// Encoded size of this mutation at messaging `version`.
    ///
    /// Only the current version is cached; older versions are recomputed.
    pub fn serialized_size(&self, version: u32) -> usize {
        if version == CURRENT_VERSION {
            *self.cached_size.get_or_init(|| self.compute_size(version))
        } else {
            self.compute_size(version)
        }
    }

    /// Reject the mutation if it would not fit in one append-log record.
    pub fn validate_size(
        &self,
        version: u32,
        overhead: usize,
        max_mutation_size: usize,
    ) -> Result<(), VerbError> {
        let size = self.serialized_size(version).saturating_add(overhead);
        if size > max_mutation_size {
            return Err(VerbError::MutationTooLarge {
                keyspace: self.keyspace.clone(),
                key: self.key_display(),
                size,
                max: max_mutation_size,
            });
        }
        Ok(())
    }

    fn compute_size(&self, version: u32) -> usize {
        let sizes = SizeModel::for_version(version);
        let mut total = sizes.string(&self.keyspace) + sizes.bytes(self.key.len());
        total += sizes.count(self.updates.len());
        for update in &self.updates {
            total += sizes.string(&update.table) + sizes.count(update.rows.len());
            for row in &update.rows {
                total += sizes.bytes(row.clustering.len()) + sizes.count(row.cells.len());
                for cell in &row.cells {
                    // flags + column + timestamp
                    total += 1 + sizes.string(&cell.column) + 8;
                    if let Some(value) = &cell.value {
                        total += sizes.bytes(value.len());
                    }
                }
            }
        }
        total
    }
}

/// Length-prefix widths for a messaging version.
struct SizeModel {
    compact: bool,
}

impl SizeModel {
    fn for_version(version: u32) -> Self {
        Self {
            compact: version >= VERSION_40,
        }
    }

    fn string(&self, s: &str) -> usize {
        if self.compact {
            vint_size(s.len() as u64) + s.len()
        } else {
            2 + s.len()
        }
    }

    fn bytes(&self, len: usize) -> usize {
        if self.compact {
            vint_size(len as u64) + len
        } else {
            4 + len
        }
    }

    fn count(&self, n: usize) -> usize {
        if self.compact {
            vint_size(n as u64)
        } else {
            4
        }
    }
}

/// Bytes needed to encode `value` as an unsigned vint (7 bits per byte).
fn vint_size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Builder for [`Mutation`]; cells for the same table and clustering key
/// are grouped into one row.
#[derive(Debug)]
pub struct MutationBuilder {
    keyspace: String,
    key: Bytes,
    updates: Vec<PartitionUpdate>,
}

impl MutationBuilder {
    pub fn new(keyspace: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Self {
            keyspace: keyspace.into(),
            key: key.into(),
            updates: Vec::new(),
        }
    }

    /// Write `value` into `column`.
    pub fn cell(
        self,
        table: &str,
        clustering: impl Into<Bytes>,
        column: &str,
        value: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        self.push(table, clustering.into(), column, Some(value.into()), timestamp)
    }

    /// Delete `column`.
    pub fn tombstone(
        self,
        table: &str,
        clustering: impl Into<Bytes>,
        column: &str,
        timestamp: i64,
    ) -> Self {
        self.push(table, clustering.into(), column, None, timestamp)
    }

    fn push(
        mut self,
        table: &str,
        clustering: Bytes,
        column: &str,
        value: Option<Bytes>,
        timestamp: i64,
    ) -> Self {
        let cell = Cell {
            column: column.to_string(),
            value,
            timestamp,
        };
        let idx = match self.updates.iter().position(|u| u.table == table) {
            Some(idx) => idx,
            None => {
                self.updates.push(PartitionUpdate {
                    table: table.to_string(),
                    rows: Vec::new(),
                });
                self.updates.len() - 1
            }
        };
        let update = &mut self.updates[idx];
        match update.rows.iter_mut().find(|r| r.clustering == clustering) {
            Some(row) => row.cells.push(cell),
            None => update.rows.push(Row {
                clustering,
                cells: vec![cell],
            }),
        }
        self
    }

    pub fn build(self) -> Mutation {
        Mutation {
            keyspace: self.keyspace,
            key: self.key,
            updates: self.updates,
            cached_size: OnceLock::new(),
        }
    }
}
