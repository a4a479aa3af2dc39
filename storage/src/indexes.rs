// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Collection DDL and index management for a ledger's collection set.
//!
//! Each ledger database holds three collections; the fields the core
//! indexes touch are denormalized into typed columns next to the JSON
//! documents. `meta.deleted` is stored as a 0-sentinel integer so it can
//! participate in unique indexes with exact set semantics.

use sqlx::SqlitePool;

use crate::errors::{Result, StorageError};

/// The three collections of a ledger's storage set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collection {
    Block,
    Event,
    Operation,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Event => "event",
            Self::Operation => "operation",
        }
    }

    /// Typed columns plugin indexes may reference.
    fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Block => &[
                "id",
                "block_type",
                "block_height",
                "previous_block_hash",
                "block_hash",
                "consensus",
                "consensus_date",
                "created",
                "updated",
                "deleted",
            ],
            Self::Event => &[
                "event_hash",
                "event_type",
                "consensus",
                "consensus_date",
                "block_height",
                "block_order",
                "effective_configuration",
                "created",
                "updated",
                "deleted",
            ],
            Self::Operation => &[
                "record_id",
                "operation_hash",
                "event_hash",
                "event_order",
                "deleted",
            ],
        }
    }
}

const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS block (
        id TEXT NOT NULL,
        block_type TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        previous_block_hash TEXT,
        block_hash TEXT NOT NULL,
        consensus INTEGER NOT NULL DEFAULT 0,
        consensus_date INTEGER,
        created INTEGER NOT NULL,
        updated INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        block TEXT NOT NULL,
        meta TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS event (
        event_hash TEXT NOT NULL,
        event_type TEXT NOT NULL,
        consensus INTEGER NOT NULL DEFAULT 0,
        consensus_date INTEGER,
        block_height INTEGER,
        block_order INTEGER,
        effective_configuration INTEGER,
        created INTEGER NOT NULL,
        updated INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        event TEXT NOT NULL,
        meta TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS operation (
        record_id TEXT NOT NULL,
        operation_hash TEXT NOT NULL,
        event_hash TEXT NOT NULL,
        event_order INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        operation TEXT NOT NULL,
        meta TEXT NOT NULL
    )"#,
];

/// Core indexes, name first. Names are quoted identifiers and unique per
/// ledger database.
const CORE_INDEXES: &[(&str, &str)] = &[
    (
        "block.id.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "block.id.core.1"
           ON block (id)"#,
    ),
    (
        "block.blockHash.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "block.blockHash.core.1"
           ON block (block_hash)"#,
    ),
    (
        "block.type.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "block.type.core.1"
           ON block (block_type, block_height)"#,
    ),
    (
        "block.previousBlockHash.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "block.previousBlockHash.core.1"
           ON block (consensus, previous_block_hash)"#,
    ),
    (
        "block.consensus.core.1",
        r#"CREATE INDEX IF NOT EXISTS "block.consensus.core.1"
           ON block (consensus)"#,
    ),
    (
        "block.consensusDate.core.1",
        r#"CREATE INDEX IF NOT EXISTS "block.consensusDate.core.1"
           ON block (consensus_date)"#,
    ),
    (
        "block.deleted.core.1",
        r#"CREATE INDEX IF NOT EXISTS "block.deleted.core.1"
           ON block (deleted)"#,
    ),
    (
        "event.eventHash.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "event.eventHash.core.1"
           ON event (event_hash)"#,
    ),
    (
        "event.deleted.core.1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "event.deleted.core.1"
           ON event (deleted, event_hash)"#,
    ),
    (
        "event.blockHeight.core.1",
        r#"CREATE INDEX IF NOT EXISTS "event.blockHeight.core.1"
           ON event (block_height, block_order)
           WHERE block_height IS NOT NULL"#,
    ),
    (
        "event.consensus.core.1",
        r#"CREATE INDEX IF NOT EXISTS "event.consensus.core.1"
           ON event (consensus, event_type, block_height)"#,
    ),
    (
        "event.created.core.1",
        r#"CREATE INDEX IF NOT EXISTS "event.created.core.1"
           ON event (event_type, created)"#,
    ),
    (
        "event.consensusDate.core.1",
        r#"CREATE INDEX IF NOT EXISTS "event.consensusDate.core.1"
           ON event (event_type, consensus_date)"#,
    ),
    (
        "operationIndex1",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS "operationIndex1"
           ON operation (event_hash, event_order, operation_hash, deleted)"#,
    ),
    (
        "operationIndex2",
        r#"CREATE INDEX IF NOT EXISTS "operationIndex2"
           ON operation (record_id)"#,
    ),
    (
        "operation.operationHash.core.1",
        r#"CREATE INDEX IF NOT EXISTS "operation.operationHash.core.1"
           ON operation (operation_hash)"#,
    ),
];

/// Creates the three collections and their core indexes.
pub(crate) async fn create_collections(pool: &SqlitePool) -> Result<()> {
    for ddl in CREATE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    for (_, ddl) in CORE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

fn is_core_index(name: &str) -> bool {
    CORE_INDEXES.iter().any(|(core, _)| *core == name)
}

fn valid_identifier(s: &str, extra: &[char]) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c))
}

/// Handle passed to plugins at ledger creation, allowing additional
/// indexes on the core collections.
pub struct IndexBuilder<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IndexBuilder<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates an additional index over typed columns of `collection`.
    ///
    /// Reusing a core index name is a `DuplicateError`; referencing an
    /// unknown column is a `DataError`.
    pub async fn create_index(
        &self,
        collection: Collection,
        name: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<()> {
        if is_core_index(name) {
            return Err(StorageError::duplicate("index", name));
        }
        if !valid_identifier(name, &['.', '-']) {
            return Err(StorageError::data(format!(
                "invalid index name `{name}`"
            )));
        }
        if columns.is_empty() {
            return Err(StorageError::data(
                "an index needs at least one column",
            ));
        }
        for column in columns {
            if !collection.columns().contains(column) {
                return Err(StorageError::data(format!(
                    "unknown column `{column}` on collection `{}`",
                    collection.table()
                )));
            }
        }

        let uniqueness = if unique { "UNIQUE " } else { "" };
        let columns = columns.join(", ");
        let ddl = format!(
            r#"CREATE {uniqueness}INDEX IF NOT EXISTS "{name}" ON {table} ({columns})"#,
            table = collection.table(),
        );
        sqlx::query(&ddl).execute(self.pool).await?;

        Ok(())
    }
}
