//! Applies batches of wire records to the store as insert-or-replace.
//!
//! A batch is one transaction. Every record is decoded and staged in order;
//! a record whose key was already seen, either in the store or earlier in the
//! same batch, replaces the whole row. Any failure rolls back the batch so
//! callers never observe a partially applied one.

use crate::decoder::{RawRecord, decode};
use crate::errors::{DataReceiverError, Result};
use crate::metrics_defs::{
    BATCH_DURATION, BATCH_RECORDS, BATCHES_FAILED, ROWS_INSERTED, ROWS_UPDATED,
};
use crate::registry::EntityRegistry;
use row_store::{EntityDescriptor, RowStore, Transaction};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Counts of rows created and replaced by one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct UpsertEngine {
    registry: Arc<EntityRegistry>,
    store: Arc<dyn RowStore>,
}

impl UpsertEngine {
    pub fn new(registry: Arc<EntityRegistry>, store: Arc<dyn RowStore>) -> Self {
        UpsertEngine { registry, store }
    }

    /// Applies `records` to the entity `identifier` resolves to.
    ///
    /// An unknown identifier is rejected before the store is touched. An empty
    /// batch succeeds with nothing inserted or updated.
    pub async fn apply(&self, identifier: &str, records: &[RawRecord]) -> Result<UpsertSummary> {
        let started = Instant::now();
        let result = self.apply_batch(identifier, records).await;
        histogram!(BATCH_DURATION).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(summary) => tracing::info!(
                table = identifier,
                records = records.len(),
                inserted = summary.inserted,
                updated = summary.updated,
                "Batch applied"
            ),
            Err(e) => {
                counter!(BATCHES_FAILED, "reason" => e.kind()).increment(1);
                tracing::warn!(
                    table = identifier,
                    records = records.len(),
                    error = %e,
                    "Batch rejected"
                );
            }
        }

        result
    }

    async fn apply_batch(&self, identifier: &str, records: &[RawRecord]) -> Result<UpsertSummary> {
        let descriptor = self.registry.resolve(identifier)?;
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }
        histogram!(BATCH_RECORDS).record(records.len() as f64);

        let mut tx = self.store.begin().await?;
        let summary = match stage(tx.as_mut(), &descriptor, records).await {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::error!(error = %rollback_error, "Rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        let entity = descriptor.name().to_string();
        counter!(ROWS_INSERTED, "entity" => entity.clone()).increment(summary.inserted as u64);
        counter!(ROWS_UPDATED, "entity" => entity).increment(summary.updated as u64);
        Ok(summary)
    }
}

/// Decodes and stages every record of a batch in order.
async fn stage(
    tx: &mut dyn Transaction,
    descriptor: &EntityDescriptor,
    records: &[RawRecord],
) -> Result<UpsertSummary> {
    let table = descriptor.name();
    let mut summary = UpsertSummary::default();

    for (index, raw) in records.iter().enumerate() {
        let record =
            decode(raw, descriptor).map_err(|source| DataReceiverError::Decode { index, source })?;
        let (key, row) = record.into_parts();

        // Staged writes are visible here, so a repeated key replaces the earlier record
        if tx.get(table, &key).await?.is_some() {
            tx.replace(table, key, row).await?;
            summary.updated += 1;
        } else {
            tx.insert(table, key, row).await?;
            summary.inserted += 1;
        }
    }

    Ok(summary)
}
