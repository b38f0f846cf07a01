//! Transactional row storage keyed by natural keys.
//!
//! The [`RowStore`] and [`Transaction`] traits are the storage boundary the
//! upsert engine is written against. [`MemoryStore`] implements them in
//! memory, optionally persisting a full snapshot on every commit through a
//! [`SnapshotProvider`].

pub mod config;
pub mod memory;
pub mod metrics_defs;
pub mod schema;
pub mod snapshot;
pub mod value;

pub use memory::MemoryStore;
pub use schema::{EntityDescriptor, FieldSpec, FieldType, SchemaError};
pub use snapshot::SnapshotProvider;
pub use value::{Row, RowKey, Value};

use async_trait::async_trait;
use config::{StoreConfig, StoreType};
use snapshot::{FilesystemSnapshotProvider, NoopSnapshotProvider, SnapshotError};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: RowKey },

    #[error("no row with key {key} in table {table}")]
    RowNotFound { table: String, key: RowKey },

    #[error("constraint violation in table {table}, field {field}: {reason}")]
    Constraint {
        table: String,
        field: String,
        reason: String,
    },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A store of rows grouped in tables, each row identified by its natural key.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Opens a unit of work. Nothing it writes is visible to others until commit.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Reads one committed row.
    async fn fetch(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Number of committed rows in `table`.
    async fn count(&self, table: &str) -> Result<usize, StoreError>;
}

/// One unit of work against a [`RowStore`].
///
/// Reads observe the transaction's own staged writes. Dropping a transaction
/// without committing discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Stages a new row. Fails if a row with `key` is already visible.
    async fn insert(&mut self, table: &str, key: RowKey, row: Row) -> Result<(), StoreError>;

    /// Stages a full overwrite of an existing row.
    async fn replace(&mut self, table: &str, key: RowKey, row: Row) -> Result<(), StoreError>;

    /// Applies every staged write atomically, or none of them.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens the store described by `config` with one table per descriptor.
///
/// A persistent store loads its last snapshot before returning.
pub async fn open(
    config: &StoreConfig,
    descriptors: Vec<Arc<EntityDescriptor>>,
) -> Result<MemoryStore, StoreError> {
    let provider: Arc<dyn SnapshotProvider> = match &config.r#type {
        StoreType::Memory => Arc::new(NoopSnapshotProvider {}),
        StoreType::Filesystem { base_dir, filename } => Arc::new(
            FilesystemSnapshotProvider::new(base_dir, filename, config.compression),
        ),
    };

    MemoryStore::open(descriptors, provider).await
}
