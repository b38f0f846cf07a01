use crate::metrics_defs::{
    COMMIT_DURATION, COMMIT_WRITES, SNAPSHOT_BYTES, SNAPSHOT_WRITE_DURATION,
};
use crate::schema::EntityDescriptor;
use crate::snapshot::{NoopSnapshotProvider, Snapshot, SnapshotProvider};
use crate::value::{Row, RowKey};
use crate::{RowStore, StoreError, Transaction};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use shared::{gauge, histogram};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
struct Table {
    descriptor: Arc<EntityDescriptor>,
    // Persistent map: cloning the committed state for a commit is cheap
    rows: im::HashMap<RowKey, Row>,
}

impl Table {
    /// Adds snapshot rows, refusing any that no longer fit the descriptor.
    fn load(&mut self, name: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        for row in rows {
            self.descriptor
                .check_row(&row)
                .map_err(|violation| StoreError::Constraint {
                    table: name.to_string(),
                    field: violation.field,
                    reason: format!("snapshot row rejected: {}", violation.reason),
                })?;

            let key = self.descriptor.key_of(&row);
            if self.rows.contains_key(&key) {
                return Err(StoreError::DuplicateKey {
                    table: name.to_string(),
                    key,
                });
            }
            self.rows.insert(key, row);
        }
        Ok(())
    }
}

type Tables = HashMap<String, Table>;

struct StoreInner {
    tables: RwLock<Tables>,
    // Serialises commits so each one validates against the state it replaces
    commit_lock: tokio::sync::Mutex<()>,
    snapshot: Arc<dyn SnapshotProvider>,
}

/// Row store kept in memory, one table per entity descriptor.
///
/// Transactions stage their writes privately. A commit re-checks every staged
/// write against the committed state under the commit lock, so of two
/// transactions inserting the same key only the first to commit succeeds.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Creates an empty store that persists nothing.
    pub fn new(descriptors: Vec<Arc<EntityDescriptor>>) -> Self {
        Self::with_tables(empty_tables(descriptors), Arc::new(NoopSnapshotProvider {}))
    }

    /// Creates a store and loads the last snapshot kept by `provider`.
    pub async fn open(
        descriptors: Vec<Arc<EntityDescriptor>>,
        provider: Arc<dyn SnapshotProvider>,
    ) -> Result<Self, StoreError> {
        let mut tables = empty_tables(descriptors);

        let loader = provider.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| StoreError::Internal(format!("snapshot load task failed: {e}")))??;

        if let Some(snapshot) = loaded {
            for (name, rows) in snapshot.tables {
                let Some(table) = tables.get_mut(&name) else {
                    tracing::warn!(table = %name, rows = rows.len(), "Dropping rows of unknown table");
                    continue;
                };
                table.load(&name, rows)?;
            }

            for (name, table) in &tables {
                tracing::info!(table = %name, rows = table.rows.len(), "Loaded table");
            }
        }

        Ok(Self::with_tables(tables, provider))
    }

    fn with_tables(tables: Tables, snapshot: Arc<dyn SnapshotProvider>) -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                tables: RwLock::new(tables),
                commit_lock: tokio::sync::Mutex::new(()),
                snapshot,
            }),
        }
    }

    fn committed(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(table.rows.get(key).cloned())
    }

    async fn apply(&self, staged: IndexMap<(String, RowKey), StagedWrite>) -> Result<(), StoreError> {
        let _commit = self.inner.commit_lock.lock().await;
        let writes = staged.len();
        let mut next = self.inner.tables.read().clone();

        for ((table_name, key), write) in staged {
            let table = next
                .get_mut(&table_name)
                .ok_or_else(|| StoreError::UnknownTable(table_name.clone()))?;

            let (row, must_exist) = match write {
                StagedWrite::Insert(row) => (row, false),
                StagedWrite::Replace(row) => (row, true),
            };

            let exists = table.rows.contains_key(&key);
            if exists && !must_exist {
                return Err(StoreError::DuplicateKey {
                    table: table_name,
                    key,
                });
            }
            if !exists && must_exist {
                return Err(StoreError::RowNotFound {
                    table: table_name,
                    key,
                });
            }

            if table.descriptor.key_of(&row) != key {
                return Err(StoreError::Internal(format!(
                    "row written to {table_name} under key {key} carries a different key"
                )));
            }

            table
                .descriptor
                .check_row(&row)
                .map_err(|violation| StoreError::Constraint {
                    table: table_name.clone(),
                    field: violation.field,
                    reason: violation.reason,
                })?;

            table.rows.insert(key, row);
        }

        if self.inner.snapshot.is_persistent() {
            let snapshot = snapshot_of(&next);
            let provider = self.inner.snapshot.clone();
            let started = Instant::now();

            let size = tokio::task::spawn_blocking(move || provider.store(&snapshot))
                .await
                .map_err(|e| StoreError::Internal(format!("snapshot store task failed: {e}")))??;

            histogram!(SNAPSHOT_WRITE_DURATION).record(started.elapsed().as_secs_f64());
            gauge!(SNAPSHOT_BYTES).set(size as f64);
        }

        *self.inner.tables.write() = next;
        histogram!(COMMIT_WRITES).record(writes as f64);
        Ok(())
    }
}

fn empty_tables(descriptors: Vec<Arc<EntityDescriptor>>) -> Tables {
    descriptors
        .into_iter()
        .map(|descriptor| {
            (
                descriptor.name().to_string(),
                Table {
                    descriptor,
                    rows: im::HashMap::new(),
                },
            )
        })
        .collect()
}

fn snapshot_of(tables: &Tables) -> Snapshot {
    Snapshot::new(
        tables
            .iter()
            .map(|(name, table)| (name.clone(), table.rows.values().cloned().collect()))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: IndexMap::new(),
        }))
    }

    async fn fetch(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        self.committed(table, key)
    }

    async fn count(&self, table: &str) -> Result<usize, StoreError> {
        let tables = self.inner.tables.read();
        tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

enum StagedWrite {
    Insert(Row),
    Replace(Row),
}

pub struct MemoryTransaction {
    store: MemoryStore,
    // Applied in staging order at commit
    staged: IndexMap<(String, RowKey), StagedWrite>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        match self.staged.get(&(table.to_string(), key.clone())) {
            Some(StagedWrite::Insert(row) | StagedWrite::Replace(row)) => Ok(Some(row.clone())),
            None => self.store.committed(table, key),
        }
    }

    async fn insert(&mut self, table: &str, key: RowKey, row: Row) -> Result<(), StoreError> {
        if self.get(table, &key).await?.is_some() {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                key,
            });
        }

        self.staged
            .insert((table.to_string(), key), StagedWrite::Insert(row));
        Ok(())
    }

    async fn replace(&mut self, table: &str, key: RowKey, row: Row) -> Result<(), StoreError> {
        let staged_key = (table.to_string(), key);

        match self.staged.get_mut(&staged_key) {
            // A row inserted earlier in this transaction stays an insert
            Some(StagedWrite::Insert(staged) | StagedWrite::Replace(staged)) => {
                *staged = row;
                Ok(())
            }
            None => {
                if self.store.committed(table, &staged_key.1)?.is_none() {
                    let (table, key) = staged_key;
                    return Err(StoreError::RowNotFound { table, key });
                }
                self.staged.insert(staged_key, StagedWrite::Replace(row));
                Ok(())
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, staged } = *self;
        if staged.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let result = store.apply(staged).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        histogram!(COMMIT_DURATION, "status" => status).record(started.elapsed().as_secs_f64());
        result
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        tracing::debug!(writes = self.staged.len(), "Discarding staged writes");
        Ok(())
    }
}
