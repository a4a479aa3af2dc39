// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use ledger_data::ledger::{Operation, OperationRecord};
use metrics::counter;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::conf::Params;
use crate::driver::Hasher;
use crate::errors::{is_unique_violation, Result, StorageError};

/// Persists operations and reconstructs per-record history.
#[derive(Clone)]
pub struct OperationStore {
    pool: SqlitePool,
    hasher: Arc<dyn Hasher>,
    chunk_max_docs: usize,
    chunk_max_bytes: usize,
}

/// Presence query for [`OperationStore::exists`]. Hash lists collapse to
/// set semantics.
#[derive(Debug, Default, Clone)]
pub struct OperationLookup {
    pub operation_hash: Vec<String>,
    pub event_hash: Option<String>,
    pub record_id: Option<String>,
}

impl OperationLookup {
    pub fn hash(operation_hash: impl Into<String>) -> Self {
        Self {
            operation_hash: vec![operation_hash.into()],
            ..Self::default()
        }
    }

    pub fn hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_hash: hashes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn record(record_id: impl Into<String>) -> Self {
        Self {
            record_id: Some(record_id.into()),
            ..Self::default()
        }
    }

    pub fn with_event_hash(mut self, event_hash: impl Into<String>) -> Self {
        self.event_hash = Some(event_hash.into());
        self
    }
}

struct OperationRow {
    record_id: String,
    operation_hash: String,
    event_hash: String,
    event_order: i64,
    operation: String,
    meta: String,
    size: usize,
}

impl OperationStore {
    pub(crate) fn new(
        pool: SqlitePool,
        hasher: Arc<dyn Hasher>,
        params: &Params,
    ) -> Self {
        Self {
            pool,
            hasher,
            chunk_max_docs: params.insert_chunk_max_docs,
            chunk_max_bytes: params.insert_chunk_max_bytes,
        }
    }

    /// Persists a batch of operations.
    ///
    /// The batch is split into unordered chunks bounded by document count
    /// and estimated serialized size. With `ignore_duplicate`, rows that
    /// collide on `(eventHash, eventOrder, operationHash)` are skipped,
    /// which makes retries of a partially persisted batch idempotent.
    pub async fn add_many(
        &self,
        operations: Vec<OperationRecord>,
        ignore_duplicate: bool,
    ) -> Result<()> {
        let mut rows = Vec::with_capacity(operations.len());
        for record in operations {
            rows.push(self.to_row(record)?);
        }
        if rows.is_empty() {
            return Ok(());
        }

        let sizes: Vec<usize> = rows.iter().map(|r| r.size).collect();
        let chunks =
            chunk_bounds(&sizes, self.chunk_max_docs, self.chunk_max_bytes);
        debug!(
            operations = rows.len(),
            chunks = chunks.len(),
            "persisting operation batch"
        );

        let total = rows.len();
        for range in chunks {
            self.insert_chunk(&rows[range], ignore_duplicate).await?;
        }
        counter!("ledger_operations_persisted").increment(total as u64);

        Ok(())
    }

    /// True iff every supplied hash matches a live operation, all within
    /// the same event when `event_hash` is set. With only a `record_id`,
    /// true iff the record has any live operation at all.
    pub async fn exists(&self, lookup: &OperationLookup) -> Result<bool> {
        let hashes: HashSet<&str> =
            lookup.operation_hash.iter().map(String::as_str).collect();

        if hashes.is_empty() {
            let Some(record_id) = &lookup.record_id else {
                return Err(StorageError::data(
                    "exists requires an operationHash or a recordId",
                ));
            };
            let row = sqlx::query(
                "SELECT EXISTS(
                     SELECT 1 FROM operation
                     WHERE record_id = ? AND deleted = 0
                 ) AS present",
            )
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
            return Ok(row.get::<i64, _>("present") != 0);
        }

        let mut sql = String::from(
            "SELECT COUNT(DISTINCT operation_hash) AS found
             FROM operation WHERE deleted = 0",
        );
        if lookup.event_hash.is_some() {
            sql.push_str(" AND event_hash = ?");
        }
        if lookup.record_id.is_some() {
            sql.push_str(" AND record_id = ?");
        }
        sql.push_str(&format!(
            " AND operation_hash IN ({})",
            placeholders(hashes.len())
        ));

        let mut query = sqlx::query(&sql);
        if let Some(event_hash) = &lookup.event_hash {
            query = query.bind(event_hash);
        }
        if let Some(record_id) = &lookup.record_id {
            query = query.bind(record_id);
        }
        for hash in &hashes {
            query = query.bind(*hash);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("found") as usize == hashes.len())
    }

    /// All consensus operations for a record, each joined with the
    /// position of its carrying event and ordered by
    /// `(blockHeight, blockOrder, eventOrder)`.
    pub async fn get_record_history(
        &self,
        record_id: &str,
        max_block_height: Option<u64>,
    ) -> Result<Vec<OperationRecord>> {
        if record_id.is_empty() {
            return Err(StorageError::bad_type(
                "recordId must be a non-empty string",
            ));
        }

        let mut sql = String::from(
            "SELECT o.record_id, o.operation, o.meta,
                    e.block_height, e.block_order
             FROM operation o
             JOIN event e ON e.event_hash = o.event_hash
             WHERE o.record_id = ? AND o.deleted = 0 AND e.consensus = 1",
        );
        if max_block_height.is_some() {
            sql.push_str(" AND e.block_height <= ?");
        }
        sql.push_str(
            " ORDER BY e.block_height ASC, e.block_order ASC,
              o.event_order ASC",
        );

        let mut query = sqlx::query(&sql).bind(record_id);
        if let Some(height) = max_block_height {
            query = query.bind(height as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(StorageError::not_found(
                "operation history",
                record_id,
            ));
        }

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = OperationRecord {
                operation: serde_json::from_str(
                    row.get::<&str, _>("operation"),
                )?,
                meta: serde_json::from_str(row.get::<&str, _>("meta"))?,
                record_id: Some(row.get::<String, _>("record_id")),
            };
            record.meta.consensus = Some(true);
            record.meta.block_height =
                row.try_get::<i64, _>("block_height").ok().map(|h| h as u64);
            record.meta.block_order =
                row.try_get::<i64, _>("block_order").ok().map(|o| o as u64);
            history.push(record);
        }

        Ok(history)
    }

    /// Hash with the ledger's configured hash function, as used for
    /// `recordId` denormalization.
    pub fn hash(&self, data: &[u8]) -> String {
        self.hasher.hash(data)
    }

    /// Number of live operations in the collection.
    pub async fn get_count(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM operation WHERE deleted = 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    /// Operation payloads of one event, ordered by `eventOrder`.
    ///
    /// Soft-deleted rows are included: event hydration must keep working
    /// after a concurrent soft remove.
    pub(crate) async fn payloads_of_event(
        &self,
        event_hash: &str,
    ) -> Result<Vec<Operation>> {
        let rows = sqlx::query(
            "SELECT operation FROM operation
             WHERE event_hash = ? ORDER BY event_order ASC",
        )
        .bind(event_hash)
        .fetch_all(&self.pool)
        .await?;

        let mut payloads = Vec::with_capacity(rows.len());
        for row in rows {
            payloads
                .push(serde_json::from_str(row.get::<&str, _>("operation"))?);
        }
        Ok(payloads)
    }

    /// How many of `hashes` are present under `event_hash`, as a set.
    pub(crate) async fn count_for_event(
        &self,
        event_hash: &str,
        hashes: &HashSet<&str>,
    ) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(DISTINCT operation_hash) AS found
             FROM operation
             WHERE event_hash = ? AND operation_hash IN ({})",
            placeholders(hashes.len())
        );
        let mut query = sqlx::query(&sql).bind(event_hash);
        for hash in hashes {
            query = query.bind(*hash);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("found") as usize)
    }

    fn to_row(&self, mut record: OperationRecord) -> Result<OperationRow> {
        let record_id = match record.record_id.take() {
            Some(id) => id,
            None => {
                let target =
                    record.operation.record_target().ok_or_else(|| {
                        StorageError::bad_type(
                            "operation requires a string record.id or \
                             recordPatch.target",
                        )
                    })?;
                self.hasher.hash(target.as_bytes())
            }
        };

        let operation = serde_json::to_string(&record.operation)?;
        let meta = serde_json::to_string(&record.meta)?;
        // Row overhead next to the two documents.
        let size = operation.len()
            + meta.len()
            + record_id.len()
            + record.meta.event_hash.len()
            + record.meta.operation_hash.len()
            + 64;

        Ok(OperationRow {
            record_id,
            operation_hash: record.meta.operation_hash.clone(),
            event_hash: record.meta.event_hash.clone(),
            event_order: record.meta.event_order as i64,
            operation,
            meta,
            size,
        })
    }

    async fn insert_chunk(
        &self,
        rows: &[OperationRow],
        ignore_duplicate: bool,
    ) -> Result<()> {
        let verb = if ignore_duplicate {
            "INSERT OR IGNORE INTO"
        } else {
            "INSERT INTO"
        };
        let mut sql = format!(
            "{verb} operation
             (record_id, operation_hash, event_hash, event_order,
              deleted, operation, meta) VALUES "
        );
        sql.push_str(&vec!["(?, ?, ?, ?, 0, ?, ?)"; rows.len()].join(", "));

        let mut query = sqlx::query(&sql);
        for row in rows {
            query = query
                .bind(&row.record_id)
                .bind(&row.operation_hash)
                .bind(&row.event_hash)
                .bind(row.event_order)
                .bind(&row.operation)
                .bind(&row.meta);
        }

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::duplicate(
                "operation",
                "(eventHash, eventOrder, operationHash)",
            )),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Splits a document batch into contiguous chunks of at most `max_docs`
/// documents and `max_bytes` estimated size. A single oversized document
/// still gets a chunk of its own.
fn chunk_bounds(
    sizes: &[usize],
    max_docs: usize,
    max_bytes: usize,
) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0;

    for (i, size) in sizes.iter().enumerate() {
        let docs = i - start;
        if docs > 0 && (docs >= max_docs || bytes + size > max_bytes) {
            chunks.push(start..i);
            start = i;
            bytes = 0;
        }
        bytes += size;
    }
    if start < sizes.len() {
        chunks.push(start..sizes.len());
    }

    chunks
}
