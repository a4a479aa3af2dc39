// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::Arc;

use ledger_data::events::{BlockEvent, Notification};
use ledger_data::ledger::{
    Block, BlockMeta, BlockRecord, BlockSummary, ExpandedBlock, StoredBlock,
};
use ledger_data::patch::{self, PatchOp};
use ledger_data::{now_millis, to_str};
use metrics::counter;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::info;

use crate::driver::Hasher;
use crate::errors::{is_unique_violation, Result, StorageError};
use crate::events::EventStore;

/// Persists blocks and enforces the event-membership invariant.
#[derive(Clone)]
pub struct BlockStore {
    pool: SqlitePool,
    hasher: Arc<dyn Hasher>,
    ledger_node_id: String,
    notifier: broadcast::Sender<Notification>,
    events: EventStore,
}

impl BlockStore {
    pub(crate) fn new(
        pool: SqlitePool,
        hasher: Arc<dyn Hasher>,
        ledger_node_id: String,
        notifier: broadcast::Sender<Notification>,
        events: EventStore,
    ) -> Self {
        Self {
            pool,
            hasher,
            ledger_node_id,
            notifier,
            events,
        }
    }

    /// Persists one block.
    ///
    /// Every hash in `block.event` must belong to an event assigned to
    /// this block's height; the stored document keeps the hash list and
    /// never inlines events. A `block.add` notification goes out after a
    /// successful insert unless `emit` is false.
    pub async fn add(
        &self,
        block: Block<String>,
        meta: BlockMeta,
        emit: bool,
    ) -> Result<()> {
        if meta.block_hash.is_empty() {
            return Err(StorageError::bad_type("meta.blockHash is required"));
        }

        let unique: HashSet<&str> =
            block.event.iter().map(String::as_str).collect();
        let assigned = self
            .events
            .count_at_height(block.block_height, &unique)
            .await?;
        if assigned != unique.len() {
            return Err(StorageError::invalid_state(format!(
                "block {} references {} events at height {} but only \
                 {assigned} are assigned to it",
                to_str(&meta.block_hash),
                unique.len(),
                block.block_height,
            )));
        }

        let mut meta = meta;
        let now = now_millis();
        meta.created = now;
        meta.updated = now;
        meta.deleted = None;

        let id = self.hasher.hash(block.id.as_bytes());
        let block_json = serde_json::to_string(&block)?;
        let meta_json = serde_json::to_string(&meta)?;

        let res = sqlx::query(
            "INSERT INTO block
             (id, block_type, block_height, previous_block_hash,
              block_hash, consensus, consensus_date, created, updated,
              deleted, block, meta)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&block.block_type)
        .bind(block.block_height as i64)
        .bind(&block.previous_block_hash)
        .bind(&meta.block_hash)
        .bind(meta.consensus)
        .bind(meta.consensus_date.map(|d| d as i64))
        .bind(now as i64)
        .bind(now as i64)
        .bind(&block_json)
        .bind(&meta_json)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StorageError::duplicate(
                    "block",
                    &meta.block_hash,
                ));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            height = block.block_height,
            hash = to_str(&meta.block_hash),
            "block persisted"
        );
        counter!("ledger_blocks_added").increment(1);

        if emit {
            let _ = self.notifier.send(
                BlockEvent::Added {
                    block_hash: meta.block_hash.clone(),
                    block_height: block.block_height,
                    ledger_node_id: self.ledger_node_id.clone(),
                }
                .into(),
            );
        }

        Ok(())
    }

    /// Fetches a block by its `block.id`, events expanded.
    pub async fn get(
        &self,
        block_id: &str,
        consensus: bool,
    ) -> Result<ExpandedBlock> {
        let id = self.hasher.hash(block_id.as_bytes());
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE id = ? AND consensus = ? AND deleted = 0",
        )
        .bind(&id)
        .bind(consensus)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("block", block_id))?;

        self.expand(parse_row(&row)?).await
    }

    /// The consensus block at `block_height`, events expanded.
    pub async fn get_by_height(
        &self,
        block_height: u64,
    ) -> Result<ExpandedBlock> {
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE block_height = ? AND consensus = 1 AND deleted = 0",
        )
        .bind(block_height as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StorageError::not_found("block", format!("height {block_height}"))
        })?;

        self.expand(parse_row(&row)?).await
    }

    /// The consensus block at height 0, events expanded.
    pub async fn get_genesis(&self) -> Result<ExpandedBlock> {
        self.get_by_height(0).await
    }

    /// The consensus block with the greatest height, events expanded.
    /// `None` on an empty ledger.
    pub async fn get_latest(&self) -> Result<Option<ExpandedBlock>> {
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE consensus = 1 AND deleted = 0
             ORDER BY block_height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.expand(parse_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    /// The greatest height that reached consensus.
    pub async fn get_latest_block_height(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT MAX(block_height) AS height FROM block
             WHERE consensus = 1 AND deleted = 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let height: Option<i64> = row.try_get("height")?;
        height
            .map(|h| h as u64)
            .ok_or_else(|| StorageError::not_found("block", "latest height"))
    }

    /// Projection of the latest consensus block, events never expanded.
    pub async fn get_latest_summary(
        &self,
        include_event_hashes: bool,
    ) -> Result<BlockSummary> {
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE consensus = 1 AND deleted = 0
             ORDER BY block_height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("block", "latest"))?;

        self.summarize(parse_row(&row)?, include_event_hashes).await
    }

    /// Projection of a block fetched by `block.id`.
    #[deprecated(note = "superseded by `get_summary_by_height`")]
    pub async fn get_summary(
        &self,
        block_id: &str,
        consensus: bool,
        include_event_hashes: bool,
    ) -> Result<BlockSummary> {
        let id = self.hasher.hash(block_id.as_bytes());
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE id = ? AND consensus = ? AND deleted = 0",
        )
        .bind(&id)
        .bind(consensus)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("block", block_id))?;

        self.summarize(parse_row(&row)?, include_event_hashes).await
    }

    /// Projection of the consensus block at `block_height`.
    pub async fn get_summary_by_height(
        &self,
        block_height: u64,
        include_event_hashes: bool,
    ) -> Result<BlockSummary> {
        let row = sqlx::query(
            "SELECT block, meta FROM block
             WHERE block_height = ? AND consensus = 1 AND deleted = 0",
        )
        .bind(block_height as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StorageError::not_found("block", format!("height {block_height}"))
        })?;

        self.summarize(parse_row(&row)?, include_event_hashes).await
    }

    /// Applies a meta-only patch to a block.
    pub async fn update(
        &self,
        block_hash: &str,
        ops: &[PatchOp],
    ) -> Result<()> {
        let row = sqlx::query("SELECT meta FROM block WHERE block_hash = ?")
            .bind(block_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("block", block_hash))?;

        let mut meta_doc: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(row.get::<&str, _>("meta"))?;
        patch::apply(&mut meta_doc, ops)?;

        let mut meta: BlockMeta =
            serde_json::from_value(serde_json::Value::Object(meta_doc))
                .map_err(|e| {
                    StorageError::data(format!(
                        "patched meta is not a valid block meta: {e}"
                    ))
                })?;
        if meta.block_hash != block_hash {
            return Err(StorageError::not_allowed(
                "meta.blockHash is immutable",
            ));
        }
        meta.updated = now_millis();

        let res = sqlx::query(
            "UPDATE block SET
                 meta = ?, consensus = ?, consensus_date = ?,
                 updated = ?, deleted = ?
             WHERE block_hash = ?",
        )
        .bind(serde_json::to_string(&meta)?)
        .bind(meta.consensus)
        .bind(meta.consensus_date.map(|d| d as i64))
        .bind(meta.updated as i64)
        .bind(meta.deleted.map(|d| d as i64).unwrap_or(0))
        .bind(block_hash)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::not_found("block", block_hash));
        }
        Ok(())
    }

    /// Soft-deletes a block. The document remains in storage.
    pub async fn remove(&self, block_hash: &str) -> Result<()> {
        let now = now_millis() as i64;
        let res = sqlx::query(
            "UPDATE block SET
                 deleted = ?, updated = ?,
                 meta = json_set(meta, '$.deleted', ?, '$.updated', ?)
             WHERE block_hash = ? AND deleted = 0",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(block_hash)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::not_found("block", block_hash));
        }
        Ok(())
    }

    /// Number of live blocks matching the filter.
    pub async fn get_count(&self, consensus: Option<bool>) -> Result<u64> {
        let mut sql = String::from(
            "SELECT COUNT(*) AS total FROM block WHERE deleted = 0",
        );
        if consensus.is_some() {
            sql.push_str(" AND consensus = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(consensus) = consensus {
            query = query.bind(consensus);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    /// Replaces the stored hash list with full event records, ordered by
    /// `blockOrder`. Operation payloads are present on operation events
    /// only.
    async fn expand(&self, stored: StoredBlock) -> Result<ExpandedBlock> {
        let StoredBlock { block, meta } = stored;
        let records = self.events.records_for_block(&block.event).await?;
        Ok(BlockRecord {
            block: block.with_events(records),
            meta,
        })
    }

    async fn summarize(
        &self,
        stored: StoredBlock,
        include_event_hashes: bool,
    ) -> Result<BlockSummary> {
        let block_height = stored.block.block_height;
        let mut summary = BlockSummary::from_stored(stored);
        if include_event_hashes {
            summary.event =
                Some(self.events.hashes_at_height(block_height).await?);
        }
        Ok(summary)
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredBlock> {
    Ok(StoredBlock {
        block: serde_json::from_str(row.get::<&str, _>("block"))?,
        meta: serde_json::from_str(row.get::<&str, _>("meta"))?,
    })
}
