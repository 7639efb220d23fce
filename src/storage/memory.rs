//! In-memory applier.
//!
//! Tables live in a single `tokio::sync::RwLock<HashMap<...>>`. A write
//! waits for the lock at most `write_timeout`; past that it resolves to
//! [`ApplyError::WriteTimeout`]. When `max_pending_writes` writes are
//! already in flight, new ones are refused synchronously with the same
//! error so an overloaded node sheds load instead of queueing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::applier::{Applier, ApplyFuture};
use crate::errors::ApplyError;
use crate::mutation::payload::{Cell, Mutation};

/// `(keyspace, table)`.
type TableId = (String, String);
/// `(partition key, clustering)` -> column -> winning cell.
type Table = BTreeMap<(Bytes, Bytes), BTreeMap<String, Cell>>;
type Tables = HashMap<TableId, Table>;

/// Tunables for [`MemoryApplier`].
#[derive(Debug, Clone)]
pub struct MemoryApplierOptions {
    /// How long a write may wait for the table lock.
    pub write_timeout: Duration,
    /// In-flight writes allowed before refusing new ones. 0 = unlimited.
    pub max_pending_writes: usize,
    /// Upper bound of a random delay added before each write.
    pub simulated_latency: Duration,
}

impl Default for MemoryApplierOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            max_pending_writes: 0,
            simulated_latency: Duration::ZERO,
        }
    }
}

/// Applier keeping every table in memory with last-write-wins cells.
#[derive(Clone)]
pub struct MemoryApplier {
    inner: Arc<Inner>,
}

struct Inner {
    tables: Arc<RwLock<Tables>>,
    options: MemoryApplierOptions,
    pending: AtomicUsize,
    applied: AtomicU64,
    closed: AtomicBool,
}

/// Holds the table lock; writes queue behind it until dropped.
pub struct WritePause {
    _guard: OwnedRwLockWriteGuard<Tables>,
}

/// Decrements the in-flight count however the write ends.
struct PendingSlot(Arc<Inner>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryApplier {
    pub fn new(options: MemoryApplierOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Arc::new(RwLock::new(HashMap::new())),
                options,
                pending: AtomicUsize::new(0),
                applied: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of mutations fully applied so far.
    pub fn applied_count(&self) -> u64 {
        self.inner.applied.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Refuse every later write with a fault.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Block writers until the returned guard is dropped.
    pub async fn pause_writes(&self) -> WritePause {
        WritePause {
            _guard: self.inner.tables.clone().write_owned().await,
        }
    }

    /// Live cells of one row, tombstones included, ordered by column.
    pub async fn read_row(
        &self,
        keyspace: &str,
        table: &str,
        key: &[u8],
        clustering: &[u8],
    ) -> Option<Vec<Cell>> {
        let tables = self.inner.tables.read().await;
        let table = tables.get(&(keyspace.to_string(), table.to_string()))?;
        let row = table.get(&(Bytes::copy_from_slice(key), Bytes::copy_from_slice(clustering)))?;
        Some(row.values().cloned().collect())
    }

    /// Distinct partition keys stored in a table.
    pub async fn partition_count(&self, keyspace: &str, table: &str) -> usize {
        let tables = self.inner.tables.read().await;
        tables
            .get(&(keyspace.to_string(), table.to_string()))
            .map(|t| {
                let mut keys: Vec<&Bytes> = t.keys().map(|(k, _)| k).collect();
                keys.dedup();
                keys.len()
            })
            .unwrap_or(0)
    }
}

impl Applier for MemoryApplier {
    fn apply_async(&self, mutation: Arc<Mutation>) -> Result<ApplyFuture, ApplyError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ApplyError::Fault(anyhow::anyhow!("applier is closed")));
        }

        let in_flight = inner.pending.fetch_add(1, Ordering::SeqCst);
        let slot = PendingSlot(inner.clone());
        let max = inner.options.max_pending_writes;
        if max > 0 && in_flight >= max {
            tracing::debug!(
                "Refusing write to {}: {} writes already pending",
                mutation.keyspace(),
                in_flight
            );
            return Err(ApplyError::WriteTimeout {
                keyspace: mutation.keyspace().to_string(),
                timeout: Duration::ZERO,
            });
        }

        let inner = inner.clone();
        let delay = random_delay(inner.options.simulated_latency);
        Ok(Box::pin(async move {
            let _slot = slot;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let timeout = inner.options.write_timeout;
            let mut tables = tokio::time::timeout(timeout, inner.tables.write())
                .await
                .map_err(|_| ApplyError::WriteTimeout {
                    keyspace: mutation.keyspace().to_string(),
                    timeout,
                })?;
            merge(&mut tables, &mutation);
            inner.applied.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ApplyError>(())
        }))
    }
}

fn random_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

fn merge(tables: &mut Tables, mutation: &Mutation) {
    for update in mutation.updates() {
        let table = tables
            .entry((mutation.keyspace().to_string(), update.table.clone()))
            .or_default();
        for row in &update.rows {
            let stored = table
                .entry((mutation.key().clone(), row.clustering.clone()))
                .or_default();
            for cell in &row.cells {
                match stored.get(&cell.column) {
                    Some(existing) if !supersedes(cell, existing) => {}
                    _ => {
                        stored.insert(cell.column.clone(), cell.clone());
                    }
                }
            }
        }
    }
}

/// Last write wins; on equal timestamps a tombstone beats a value and the
/// greater value beats the lesser.
fn supersedes(incoming: &Cell, existing: &Cell) -> bool {
    if incoming.timestamp != existing.timestamp {
        return incoming.timestamp > existing.timestamp;
    }
    match (&incoming.value, &existing.value) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a > b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::payload::MutationBuilder;

    fn applier() -> MemoryApplier {
        MemoryApplier::new(MemoryApplierOptions::default())
    }

    fn write(key: &str, value: &str, ts: i64) -> Arc<Mutation> {
        Arc::new(
            MutationBuilder::new("ks", key.to_string())
                .cell("users", "", "name", value.to_string(), ts)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_apply_and_read_back() {
        let applier = applier();
        applier.apply_async(write("k1", "ada", 1)).unwrap().await.unwrap();

        let row = applier.read_row("ks", "users", b"k1", b"").await.unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].value.as_deref(), Some(&b"ada"[..]));
        assert_eq!(applier.applied_count(), 1);
        assert_eq!(applier.partition_count("ks", "users").await, 1);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let applier = applier();
        applier.apply_async(write("k", "new", 5)).unwrap().await.unwrap();
        applier.apply_async(write("k", "old", 3)).unwrap().await.unwrap();

        let row = applier.read_row("ks", "users", b"k", b"").await.unwrap();
        assert_eq!(row[0].value.as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn test_tombstone_wins_tie() {
        let applier = applier();
        applier.apply_async(write("k", "v", 5)).unwrap().await.unwrap();
        let delete = Arc::new(
            MutationBuilder::new("ks", "k")
                .tombstone("users", "", "name", 5)
                .build(),
        );
        applier.apply_async(delete).unwrap().await.unwrap();

        let row = applier.read_row("ks", "users", b"k", b"").await.unwrap();
        assert!(row[0].is_tombstone());
    }

    #[tokio::test]
    async fn test_write_times_out_when_paused() {
        let applier = MemoryApplier::new(MemoryApplierOptions {
            write_timeout: Duration::from_millis(20),
            ..MemoryApplierOptions::default()
        });
        let pause = applier.pause_writes().await;
        let err = applier.apply_async(write("k", "v", 1)).unwrap().await.unwrap_err();
        assert!(err.is_write_timeout());
        drop(pause);
        assert_eq!(applier.applied_count(), 0);
        assert_eq!(applier.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_limit_refuses_synchronously() {
        let applier = MemoryApplier::new(MemoryApplierOptions {
            max_pending_writes: 1,
            ..MemoryApplierOptions::default()
        });
        let first = applier.apply_async(write("a", "v", 1)).unwrap();
        let err = match applier.apply_async(write("b", "v", 1)) {
            Err(e) => e,
            Ok(_) => panic!("second write should be refused"),
        };
        assert!(err.is_write_timeout());

        first.await.unwrap();
        assert_eq!(applier.pending_count(), 0);
        applier.apply_async(write("c", "v", 1)).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_applier_faults() {
        let applier = applier();
        applier.close();
        let err = match applier.apply_async(write("k", "v", 1)) {
            Err(e) => e,
            Ok(_) => panic!("closed applier accepted a write"),
        };
        assert!(!err.is_write_timeout());
    }

    #[test]
    fn test_supersedes_rules() {
        let cell = |v: Option<&'static str>, ts| Cell {
            column: "c".into(),
            value: v.map(|s| Bytes::from_static(s.as_bytes())),
            timestamp: ts,
        };
        assert!(supersedes(&cell(Some("a"), 2), &cell(Some("z"), 1)));
        assert!(!supersedes(&cell(Some("z"), 1), &cell(Some("a"), 2)));
        assert!(supersedes(&cell(None, 1), &cell(Some("a"), 1)));
        assert!(!supersedes(&cell(Some("a"), 1), &cell(None, 1)));
        assert!(supersedes(&cell(Some("b"), 1), &cell(Some("a"), 1)));
    }
}
