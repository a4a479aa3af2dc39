// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use futures::stream::{self, BoxStream, StreamExt};
use ledger_data::ledger::{Event, EventMeta, EventRecord, EventType};
use ledger_data::patch::{self, PatchOp};
use ledger_data::{now_millis, to_str};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::{is_unique_violation, Result, StorageError};
use crate::operations::{placeholders, OperationStore};

/// Selector for [`EventStore::get_many`].
#[derive(Debug, Clone)]
pub enum EventSelector {
    /// Fetch by hash; results follow the input order.
    Hashes(Vec<String>),
    /// All events of the block at this height, sorted by `blockOrder`.
    BlockHeight(u64),
}

/// Persists events and resolves effective configurations.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
    operations: OperationStore,
}

impl EventStore {
    pub(crate) fn new(pool: SqlitePool, operations: OperationStore) -> Self {
        Self { pool, operations }
    }

    /// Persists one event.
    ///
    /// An operation event must list its operation hashes, and every listed
    /// hash must already be persisted under this event with an assigned
    /// order; the list is a join key and is stripped from the stored
    /// payload. Non-operation events must not carry one.
    pub async fn add(&self, event: Event, meta: EventMeta) -> Result<()> {
        if meta.event_hash.is_empty() {
            return Err(StorageError::bad_type("meta.eventHash is required"));
        }

        let mut event = event;
        let mut meta = meta;

        if event.event_type.is_operation() {
            let hashes = match event.operation_hash.take() {
                Some(hashes) if !hashes.is_empty() => hashes,
                _ => {
                    return Err(StorageError::data(
                        "an operation event requires a non-empty \
                         operationHash list",
                    ))
                }
            };

            let unique: HashSet<&str> =
                hashes.iter().map(String::as_str).collect();
            let found = self
                .operations
                .count_for_event(&meta.event_hash, &unique)
                .await?;
            if found != unique.len() {
                return Err(StorageError::invalid_state(format!(
                    "event {} lists {} operations but only {found} are \
                     persisted",
                    to_str(&meta.event_hash),
                    unique.len(),
                )));
            }

            meta.operation_hash = Some(hashes);
        } else if event.operation_hash.take().is_some() {
            return Err(StorageError::data(
                "only operation events may carry operationHash",
            ));
        }

        // Never store hydrated payloads.
        event.operation = None;

        let now = now_millis();
        meta.created = now;
        meta.updated = now;
        meta.deleted = None;

        let event_json = serde_json::to_string(&event)?;
        let meta_json = serde_json::to_string(&meta)?;

        let res = sqlx::query(
            "INSERT INTO event
             (event_hash, event_type, consensus, consensus_date,
              block_height, block_order, effective_configuration,
              created, updated, deleted, event, meta)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&meta.event_hash)
        .bind(event.event_type.as_str())
        .bind(meta.consensus)
        .bind(meta.consensus_date.map(|d| d as i64))
        .bind(meta.block_height.map(|h| h as i64))
        .bind(meta.block_order.map(|o| o as i64))
        .bind(meta.effective_configuration)
        .bind(now as i64)
        .bind(now as i64)
        .bind(&event_json)
        .bind(&meta_json)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StorageError::duplicate("event", &meta.event_hash))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ordered insertion with best-effort skip-on-duplicate.
    ///
    /// Returns the hashes of events skipped as duplicates; any other
    /// failure aborts the batch at the offending event.
    pub async fn add_many(
        &self,
        events: Vec<EventRecord>,
    ) -> Result<Vec<String>> {
        let mut skipped = Vec::new();
        for record in events {
            let event_hash = record.meta.event_hash.clone();
            match self.add(record.event, record.meta).await {
                Ok(()) => {}
                Err(StorageError::Duplicate { .. }) => {
                    skipped.push(event_hash);
                }
                Err(e) => return Err(e),
            }
        }

        if !skipped.is_empty() {
            debug!(skipped = skipped.len(), "event batch skipped duplicates");
        }
        Ok(skipped)
    }

    /// True iff the live event exists.
    pub async fn exists(&self, event_hash: &str) -> Result<bool> {
        self.exists_all(&[event_hash]).await
    }

    /// True iff every supplied hash matches a live event.
    pub async fn exists_all(&self, event_hashes: &[&str]) -> Result<bool> {
        let unique: HashSet<&str> = event_hashes.iter().copied().collect();
        if unique.is_empty() {
            return Ok(true);
        }

        let sql = format!(
            "SELECT COUNT(DISTINCT event_hash) AS found FROM event
             WHERE deleted = 0 AND event_hash IN ({})",
            placeholders(unique.len())
        );
        let mut query = sqlx::query(&sql);
        for hash in &unique {
            query = query.bind(*hash);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("found") as usize == unique.len())
    }

    /// The subset of `event_hashes` that is NOT present (live), input
    /// order preserved.
    pub async fn difference(
        &self,
        event_hashes: &[&str],
    ) -> Result<Vec<String>> {
        if event_hashes.is_empty() {
            return Ok(vec![]);
        }

        let unique: Vec<&str> = {
            let mut seen = HashSet::new();
            event_hashes
                .iter()
                .copied()
                .filter(|h| seen.insert(*h))
                .collect()
        };

        let sql = format!(
            "SELECT DISTINCT event_hash FROM event
             WHERE deleted = 0 AND event_hash IN ({})",
            placeholders(unique.len())
        );
        let mut query = sqlx::query(&sql);
        for hash in &unique {
            query = query.bind(*hash);
        }
        let found: HashSet<String> = query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.get("event_hash"))
            .collect();

        Ok(unique
            .into_iter()
            .filter(|h| !found.contains(*h))
            .map(str::to_owned)
            .collect())
    }

    /// Fetches one live event, hydrating operation events.
    pub async fn get(&self, event_hash: &str) -> Result<EventRecord> {
        let row = sqlx::query(
            "SELECT event, meta FROM event
             WHERE event_hash = ? AND deleted = 0",
        )
        .bind(event_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("event", event_hash))?;

        self.hydrate(parse_row(&row)?).await
    }

    /// Lazily yields events, either by hash list (input order) or by block
    /// height (`blockOrder` ascending). Operation events are hydrated.
    pub async fn get_many(
        &self,
        selector: EventSelector,
    ) -> Result<BoxStream<'static, Result<EventRecord>>> {
        match selector {
            EventSelector::Hashes(hashes) => {
                let store = self.clone();
                Ok(stream::iter(hashes)
                    .then(move |hash| {
                        let store = store.clone();
                        async move { store.get(&hash).await }
                    })
                    .boxed())
            }
            EventSelector::BlockHeight(height) => {
                let rows = sqlx::query(
                    "SELECT event, meta FROM event
                     WHERE block_height = ? AND deleted = 0
                     ORDER BY block_order ASC",
                )
                .bind(height as i64)
                .fetch_all(&self.pool)
                .await?;

                let records: Vec<Result<EventRecord>> =
                    rows.iter().map(parse_row).collect();
                let store = self.clone();
                Ok(stream::iter(records)
                    .then(move |record| {
                        let store = store.clone();
                        async move { store.hydrate(record?).await }
                    })
                    .boxed())
            }
        }
    }

    /// The configuration event with the greatest chain position.
    pub async fn get_latest_config(&self) -> Result<EventRecord> {
        self.config_before(None).await
    }

    /// The configuration event effective for the block at `block_height`:
    /// the latest one with a strictly lower height. A configuration
    /// included in block H governs blocks after H, never H itself.
    pub async fn get_active_config(
        &self,
        block_height: u64,
    ) -> Result<EventRecord> {
        self.config_before(Some(block_height)).await
    }

    async fn config_before(
        &self,
        block_height: Option<u64>,
    ) -> Result<EventRecord> {
        let mut sql = String::from(
            "SELECT event, meta FROM event
             WHERE event_type = ? AND deleted = 0 AND consensus = 1
               AND block_height IS NOT NULL",
        );
        if block_height.is_some() {
            sql.push_str(" AND block_height < ?");
        }
        sql.push_str(" ORDER BY block_height DESC, block_order DESC LIMIT 1");

        let mut query = sqlx::query(&sql).bind(EventType::CONFIGURATION);
        if let Some(height) = block_height {
            query = query.bind(height as i64);
        }

        let row = query.fetch_optional(&self.pool).await?.ok_or_else(|| {
            StorageError::not_found(
                "configuration event",
                match block_height {
                    Some(h) => format!("before height {h}"),
                    None => "latest".to_owned(),
                },
            )
        })?;

        parse_row(&row)
    }

    /// Number of live events matching the filters.
    pub async fn get_count(
        &self,
        consensus: Option<bool>,
        event_type: Option<&EventType>,
    ) -> Result<u64> {
        let mut sql =
            String::from("SELECT COUNT(*) AS total FROM event WHERE deleted = 0");
        if consensus.is_some() {
            sql.push_str(" AND consensus = ?");
        }
        if event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(consensus) = consensus {
            query = query.bind(consensus);
        }
        if let Some(event_type) = event_type {
            query = query.bind(event_type.as_str());
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    /// Applies a meta-only patch to an event.
    pub async fn update(
        &self,
        event_hash: &str,
        ops: &[PatchOp],
    ) -> Result<()> {
        let row = sqlx::query("SELECT meta FROM event WHERE event_hash = ?")
            .bind(event_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("event", event_hash))?;

        let mut meta_doc: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(row.get::<&str, _>("meta"))?;
        patch::apply(&mut meta_doc, ops)?;

        let mut meta: EventMeta =
            serde_json::from_value(serde_json::Value::Object(meta_doc))
                .map_err(|e| {
                    StorageError::data(format!(
                        "patched meta is not a valid event meta: {e}"
                    ))
                })?;
        if meta.event_hash != event_hash {
            return Err(StorageError::not_allowed(
                "meta.eventHash is immutable",
            ));
        }
        meta.updated = now_millis();

        let res = sqlx::query(
            "UPDATE event SET
                 meta = ?, consensus = ?, consensus_date = ?,
                 block_height = ?, block_order = ?,
                 effective_configuration = ?, updated = ?, deleted = ?
             WHERE event_hash = ?",
        )
        .bind(serde_json::to_string(&meta)?)
        .bind(meta.consensus)
        .bind(meta.consensus_date.map(|d| d as i64))
        .bind(meta.block_height.map(|h| h as i64))
        .bind(meta.block_order.map(|o| o as i64))
        .bind(meta.effective_configuration)
        .bind(meta.updated as i64)
        .bind(meta.deleted.map(|d| d as i64).unwrap_or(0))
        .bind(event_hash)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::not_found("event", event_hash));
        }
        Ok(())
    }

    /// Soft-deletes an event. The document remains in storage.
    pub async fn remove(&self, event_hash: &str) -> Result<()> {
        let now = now_millis() as i64;
        let res = sqlx::query(
            "UPDATE event SET
                 deleted = ?, updated = ?,
                 meta = json_set(meta, '$.deleted', ?, '$.updated', ?)
             WHERE event_hash = ? AND deleted = 0",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(event_hash)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::not_found("event", event_hash));
        }
        Ok(())
    }

    /// Event records for a block's hash list, `blockOrder` ascending.
    ///
    /// Soft-deleted events are included: a block keeps expanding after a
    /// concurrent soft remove of one of its events.
    pub(crate) async fn records_for_block(
        &self,
        event_hashes: &[String],
    ) -> Result<Vec<EventRecord>> {
        if event_hashes.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            "SELECT event, meta FROM event WHERE event_hash IN ({})",
            placeholders(event_hashes.len())
        );
        let mut query = sqlx::query(&sql);
        for hash in event_hashes {
            query = query.bind(hash);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.hydrate(parse_row(row)?).await?);
        }
        records.sort_by_key(|r| r.meta.block_order);

        Ok(records)
    }

    /// Ordered event-hash list of the block at `block_height`.
    pub(crate) async fn hashes_at_height(
        &self,
        block_height: u64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT event_hash FROM event WHERE block_height = ?
             ORDER BY block_order ASC",
        )
        .bind(block_height as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("event_hash")).collect())
    }

    /// How many of `hashes` are assigned to the block at `block_height`,
    /// as a set. Soft-deleted events count: removal never unassigns.
    pub(crate) async fn count_at_height(
        &self,
        block_height: u64,
        hashes: &HashSet<&str>,
    ) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "SELECT COUNT(DISTINCT event_hash) AS found FROM event
             WHERE block_height = ? AND event_hash IN ({})",
            placeholders(hashes.len())
        );
        let mut query = sqlx::query(&sql).bind(block_height as i64);
        for hash in hashes {
            query = query.bind(*hash);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("found") as usize)
    }

    async fn hydrate(&self, mut record: EventRecord) -> Result<EventRecord> {
        if record.event.event_type.is_operation() {
            record.event.operation = Some(
                self.operations
                    .payloads_of_event(&record.meta.event_hash)
                    .await?,
            );
        }
        Ok(record)
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<EventRecord> {
    Ok(EventRecord {
        event: serde_json::from_str(row.get::<&str, _>("event"))?,
        meta: serde_json::from_str(row.get::<&str, _>("meta"))?,
    })
}

#[cfg(test)]
mod tests {
    use ledger_data::ledger::faker::{
        gen_config_event, gen_operation, gen_operation_event,
    };
    use serde_json::json;

    use crate::testing::TestLedger;

    use super::*;

    /// Persists `count` operations under `event_hash` and returns their
    /// hashes.
    async fn seed_operations(
        t: &TestLedger,
        event_hash: &str,
        count: u64,
    ) -> Vec<String> {
        let ops: Vec<_> = (0..count)
            .map(|i| gen_operation("urn:r1", event_hash, i))
            .collect();
        let hashes =
            ops.iter().map(|o| o.meta.operation_hash.clone()).collect();
        t.storage
            .operations
            .add_many(ops, true)
            .await
            .expect("operations persist");
        hashes
    }

    #[tokio::test]
    async fn add_strips_the_join_key_from_the_payload() {
        let t = TestLedger::create("events-strip").await;
        let hashes = seed_operations(&t, "he1", 2).await;
        let hash_refs: Vec<&str> =
            hashes.iter().map(String::as_str).collect();

        let record = gen_operation_event("he1", &hash_refs);
        t.storage
            .events
            .add(record.event, record.meta)
            .await
            .expect("event persists");

        let stored =
            t.storage.events.get("he1").await.expect("event readable");
        assert_eq!(stored.event.operation_hash, None);
        assert_eq!(stored.meta.operation_hash, Some(hashes));
        assert!(stored.meta.created > 0);
    }

    #[tokio::test]
    async fn add_verifies_operation_presence() {
        let t = TestLedger::create("events-presence").await;

        // No operations at all.
        let record = gen_operation_event("he1", &["urn:hash:op:absent"]);
        let err = t
            .storage
            .events
            .add(record.event, record.meta)
            .await
            .expect_err("operations are missing");
        assert_eq!(err.name(), "InvalidState");

        // Operations exist but under a different event hash.
        let hashes = seed_operations(&t, "he-other", 1).await;
        let record = gen_operation_event("he1", &[&hashes[0]]);
        let err = t
            .storage
            .events
            .add(record.event, record.meta)
            .await
            .expect_err("operations belong to another event");
        assert_eq!(err.name(), "InvalidState");
    }

    #[tokio::test]
    async fn operation_hash_is_mandatory_on_operation_events_only() {
        let t = TestLedger::create("events-datashape").await;

        let mut record = gen_operation_event("he1", &[]);
        record.event.operation_hash = None;
        let err = t
            .storage
            .events
            .add(record.event, record.meta)
            .await
            .expect_err("operation event without hashes");
        assert_eq!(err.name(), "DataError");

        let mut config = gen_config_event("he2", 1, 0);
        config.event.operation_hash = Some(vec!["h".to_owned()]);
        let err = t
            .storage
            .events
            .add(config.event, config.meta)
            .await
            .expect_err("config event with hashes");
        assert_eq!(err.name(), "DataError");

        let mut config = gen_config_event("he3", 1, 0);
        config.meta.event_hash = String::new();
        let err = t
            .storage
            .events
            .add(config.event, config.meta)
            .await
            .expect_err("missing event hash");
        assert_eq!(err.name(), "TypeError");
    }

    #[tokio::test]
    async fn duplicates_fail_add_and_skip_in_add_many() {
        let t = TestLedger::create("events-dup").await;

        let config = gen_config_event("he1", 1, 0);
        t.storage
            .events
            .add(config.event.clone(), config.meta.clone())
            .await
            .expect("first insert");

        let err = t
            .storage
            .events
            .add(config.event.clone(), config.meta.clone())
            .await
            .expect_err("second insert collides");
        assert_eq!(err.name(), "DuplicateError");

        let batch = vec![
            config.clone(),
            gen_config_event("he2", 2, 0),
            config.clone(),
            gen_config_event("he3", 3, 0),
        ];
        let skipped =
            t.storage.events.add_many(batch).await.expect("batch runs");
        assert_eq!(skipped, vec!["he1".to_owned(), "he1".to_owned()]);
        assert!(t
            .storage
            .events
            .exists_all(&["he1", "he2", "he3"])
            .await
            .expect("all present"));
    }

    #[tokio::test]
    async fn difference_preserves_input_order() {
        let t = TestLedger::create("events-difference").await;
        for record in [
            gen_config_event("he1", 1, 0),
            gen_config_event("he3", 2, 0),
        ] {
            t.storage
                .events
                .add(record.event, record.meta)
                .await
                .expect("event persists");
        }

        let missing = t
            .storage
            .events
            .difference(&["he4", "he1", "he2", "he3", "he4"])
            .await
            .expect("difference");
        assert_eq!(missing, vec!["he4".to_owned(), "he2".to_owned()]);

        assert!(!t
            .storage
            .events
            .exists_all(&["he1", "he2"])
            .await
            .expect("lookup"));
    }

    #[tokio::test]
    async fn get_hydrates_operations_in_event_order() {
        let t = TestLedger::create("events-hydrate").await;
        let hashes = seed_operations(&t, "he1", 3).await;
        let hash_refs: Vec<&str> =
            hashes.iter().map(String::as_str).collect();

        let record = gen_operation_event("he1", &hash_refs);
        t.storage
            .events
            .add(record.event, record.meta)
            .await
            .expect("event persists");

        let stored = t.storage.events.get("he1").await.expect("event");
        let operations =
            stored.event.operation.expect("hydrated operations");
        assert_eq!(operations.len(), 3);

        // Operation payloads come back in eventOrder.
        let config = gen_config_event("he2", 1, 0);
        t.storage
            .events
            .add(config.event, config.meta)
            .await
            .expect("config persists");
        let stored = t.storage.events.get("he2").await.expect("config");
        assert_eq!(stored.event.operation, None);
    }

    #[tokio::test]
    async fn get_many_by_hashes_follows_input_order() {
        let t = TestLedger::create("events-getmany-hash").await;
        for record in [
            gen_config_event("he1", 1, 0),
            gen_config_event("he2", 2, 0),
        ] {
            t.storage
                .events
                .add(record.event, record.meta)
                .await
                .expect("event persists");
        }

        let stream = t
            .storage
            .events
            .get_many(EventSelector::Hashes(vec![
                "he2".to_owned(),
                "he1".to_owned(),
            ]))
            .await
            .expect("selector");
        let records: Vec<_> = stream
            .map(|r| r.expect("event").meta.event_hash)
            .collect()
            .await;
        assert_eq!(records, vec!["he2".to_owned(), "he1".to_owned()]);
    }

    #[tokio::test]
    async fn get_many_by_height_sorts_by_block_order() {
        let t = TestLedger::create("events-getmany-height").await;
        for (hash, order) in [("he-b", 1), ("he-a", 0), ("he-c", 2)] {
            let record = gen_config_event(hash, 5, order);
            t.storage
                .events
                .add(record.event, record.meta)
                .await
                .expect("event persists");
        }

        let stream = t
            .storage
            .events
            .get_many(EventSelector::BlockHeight(5))
            .await
            .expect("selector");
        let records: Vec<_> = stream
            .map(|r| r.expect("event").meta.event_hash)
            .collect()
            .await;
        assert_eq!(
            records,
            vec!["he-a".to_owned(), "he-b".to_owned(), "he-c".to_owned()]
        );
    }

    #[tokio::test]
    async fn active_config_boundary_is_strict() {
        let t = TestLedger::create("events-config").await;
        for (hash, height) in [("he-cfg-20", 20), ("he-cfg-30", 30)] {
            let record = gen_config_event(hash, height, 0);
            t.storage
                .events
                .add(record.event, record.meta)
                .await
                .expect("config persists");
        }

        let latest = t
            .storage
            .events
            .get_latest_config()
            .await
            .expect("latest config");
        assert_eq!(latest.meta.block_height, Some(30));

        let active = t
            .storage
            .events
            .get_active_config(30)
            .await
            .expect("active config");
        assert_eq!(active.meta.block_height, Some(20));

        let err = t
            .storage
            .events
            .get_active_config(20)
            .await
            .expect_err("nothing strictly below 20");
        assert_eq!(err.name(), "NotFound");
    }

    #[tokio::test]
    async fn config_getters_need_a_config_event() {
        let t = TestLedger::create("events-config-missing").await;
        let err = t
            .storage
            .events
            .get_latest_config()
            .await
            .expect_err("empty ledger");
        assert_eq!(err.name(), "NotFound");
    }

    #[tokio::test]
    async fn counts_filter_by_consensus_and_type() {
        let t = TestLedger::create("events-count").await;
        let hashes = seed_operations(&t, "he-op", 1).await;
        let record = gen_operation_event("he-op", &[&hashes[0]]);
        t.storage
            .events
            .add(record.event, record.meta)
            .await
            .expect("operation event");
        for record in [
            gen_config_event("he-cfg-1", 1, 0),
            gen_config_event("he-cfg-2", 2, 0),
        ] {
            t.storage
                .events
                .add(record.event, record.meta)
                .await
                .expect("config event");
        }

        let events = &t.storage.events;
        assert_eq!(events.get_count(None, None).await.expect("count"), 3);
        assert_eq!(
            events
                .get_count(Some(true), None)
                .await
                .expect("count"),
            2
        );
        assert_eq!(
            events
                .get_count(None, Some(&EventType::Configuration))
                .await
                .expect("count"),
            2
        );
        assert_eq!(
            events
                .get_count(Some(false), Some(&EventType::Operation))
                .await
                .expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn update_patches_meta_only() {
        let t = TestLedger::create("events-update").await;
        let mut record = gen_config_event("he1", 1, 0);
        record.meta.consensus = false;
        record.meta.consensus_date = None;
        t.storage
            .events
            .add(record.event, record.meta)
            .await
            .expect("event persists");

        t.storage
            .events
            .update(
                "he1",
                &[
                    PatchOp::set("meta.consensus", json!(true)),
                    PatchOp::set("meta.consensusDate", json!(12_000)),
                ],
            )
            .await
            .expect("patch applies");

        let stored = t.storage.events.get("he1").await.expect("event");
        assert!(stored.meta.consensus);
        assert_eq!(stored.meta.consensus_date, Some(12_000));

        let err = t
            .storage
            .events
            .update("he1", &[PatchOp::set("event.type", json!("X"))])
            .await
            .expect_err("payload paths are off limits");
        assert_eq!(err.name(), "NotAllowed");

        let err = t
            .storage
            .events
            .update("he-none", &[PatchOp::set("meta.consensus", json!(true))])
            .await
            .expect_err("unknown event");
        assert_eq!(err.name(), "NotFound");
    }

    #[tokio::test]
    async fn remove_is_a_soft_delete() {
        let t = TestLedger::create("events-remove").await;
        let record = gen_config_event("he1", 1, 0);
        t.storage
            .events
            .add(record.event, record.meta)
            .await
            .expect("event persists");

        t.storage.events.remove("he1").await.expect("soft delete");

        let err =
            t.storage.events.get("he1").await.expect_err("now invisible");
        assert_eq!(err.name(), "NotFound");
        assert!(!t.storage.events.exists("he1").await.expect("lookup"));

        let err = t
            .storage
            .events
            .remove("he1")
            .await
            .expect_err("already deleted");
        assert_eq!(err.name(), "NotFound");

        // The document itself survives for administrative access.
        let row = sqlx::query(
            "SELECT deleted, meta FROM event WHERE event_hash = ?",
        )
        .bind("he1")
        .fetch_one(t.storage.driver())
        .await
        .expect("raw row");
        assert!(row.get::<i64, _>("deleted") > 0);
        let meta: EventMeta =
            serde_json::from_str(row.get::<&str, _>("meta")).expect("meta");
        assert!(meta.deleted.is_some());
    }
}
