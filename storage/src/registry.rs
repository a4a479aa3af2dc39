// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use ledger_data::events::Notification;
use ledger_data::now_millis;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::blocks::BlockStore;
use crate::conf::Params;
use crate::driver::{Driver, Hasher};
use crate::errors::{is_unique_violation, Result, StorageError};
use crate::events::EventStore;
use crate::indexes::{self, IndexBuilder};
use crate::operations::OperationStore;
use crate::plugins::{self, StoragePlugin, StoreSet};

const CREATE_REGISTRY: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS ledgers (
        ledger_id TEXT NOT NULL,
        ledger_node_id TEXT NOT NULL,
        storage_id TEXT NOT NULL,
        block_collection TEXT NOT NULL,
        event_collection TEXT NOT NULL,
        operation_collection TEXT NOT NULL,
        plugins TEXT NOT NULL,
        created INTEGER NOT NULL,
        updated INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "ledger.ledgerId.core.1"
       ON ledgers (ledger_id, deleted)"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "ledger.storageId.core.1"
       ON ledgers (storage_id)"#,
];

/// The ledger registry: allocates, reopens, soft-deletes and enumerates
/// per-ledger collection sets.
#[derive(Clone)]
pub struct Ledgers {
    driver: Driver,
    notifier: broadcast::Sender<Notification>,
}

impl Ledgers {
    /// Creates or opens the registry under `base`.
    ///
    /// Panics if the registry database cannot be opened; runtime
    /// operations return errors instead.
    pub async fn create_or_open<P: AsRef<Path>>(
        base: P,
        params: Params,
        hasher: Arc<dyn Hasher>,
    ) -> Self {
        let (notifier, _) =
            broadcast::channel(params.notification_channel_capacity);
        let driver = Driver::create_or_open(base, params, hasher).await;

        for ddl in CREATE_REGISTRY {
            sqlx::query(ddl)
                .execute(driver.registry())
                .await
                .expect("the registry schema should install");
        }

        Self { driver, notifier }
    }

    /// Subscribes to engine notifications (`block.add`).
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Allocates a new ledger: verifies its plugins, creates the
    /// collection set with core and plugin indexes, persists the
    /// registry row and returns the composite handle.
    pub async fn add(
        &self,
        ledger_id: &str,
        ledger_node_id: &str,
        plugin_names: &[&str],
    ) -> Result<Storage> {
        let plugins = plugins::resolve(plugin_names)?;

        let present = sqlx::query(
            "SELECT 1 FROM ledgers WHERE ledger_id = ? AND deleted = 0",
        )
        .bind(ledger_id)
        .fetch_optional(self.driver.registry())
        .await?;
        if present.is_some() {
            return Err(StorageError::duplicate("ledger", ledger_id));
        }

        let storage_id = Uuid::new_v4().to_string();
        let pool = self.driver.ledger_pool(&storage_id, true).await?;
        indexes::create_collections(&pool).await?;

        let builder = IndexBuilder::new(&pool);
        for plugin in &plugins {
            plugin.expand_indexes(&builder).await?;
        }

        let now = now_millis() as i64;
        let res = sqlx::query(
            "INSERT INTO ledgers
             (ledger_id, ledger_node_id, storage_id, block_collection,
              event_collection, operation_collection, plugins,
              created, updated, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(ledger_id)
        .bind(ledger_node_id)
        .bind(&storage_id)
        .bind(format!("{storage_id}.block"))
        .bind(format!("{storage_id}.event"))
        .bind(format!("{storage_id}.operation"))
        .bind(serde_json::to_string(plugin_names)?)
        .bind(now)
        .bind(now)
        .execute(self.driver.registry())
        .await;

        match res {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StorageError::duplicate("ledger", ledger_id));
            }
            Err(e) => return Err(e.into()),
        }

        info!(ledger_id, storage_id, "ledger created");

        self.build_handle(
            pool,
            storage_id,
            ledger_id.to_owned(),
            ledger_node_id.to_owned(),
            &plugins,
        )
    }

    /// Reopens the ledger identified by `storage_id`.
    pub async fn get(&self, storage_id: &str) -> Result<Storage> {
        let row = sqlx::query(
            "SELECT ledger_id, ledger_node_id, plugins FROM ledgers
             WHERE storage_id = ? AND deleted = 0",
        )
        .bind(storage_id)
        .fetch_optional(self.driver.registry())
        .await?
        .ok_or_else(|| StorageError::not_found("ledger", storage_id))?;

        let plugin_names: Vec<String> =
            serde_json::from_str(row.get::<&str, _>("plugins"))?;
        let names: Vec<&str> =
            plugin_names.iter().map(String::as_str).collect();
        let plugins = plugins::resolve(&names)?;

        let pool = self.driver.ledger_pool(storage_id, false).await?;
        self.build_handle(
            pool,
            storage_id.to_owned(),
            row.get("ledger_id"),
            row.get("ledger_node_id"),
            &plugins,
        )
    }

    /// Soft-deletes a ledger's registry row; its collection set stays on
    /// disk but becomes invisible to `get` and `iterate`.
    pub async fn remove(&self, storage_id: &str) -> Result<()> {
        let now = now_millis() as i64;
        let res = sqlx::query(
            "UPDATE ledgers SET deleted = ?, updated = ?
             WHERE storage_id = ? AND deleted = 0",
        )
        .bind(now)
        .bind(now)
        .bind(storage_id)
        .execute(self.driver.registry())
        .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::not_found("ledger", storage_id));
        }

        info!(storage_id, "ledger removed");
        Ok(())
    }

    /// Finite forward-only stream over all live ledgers, opening each
    /// handle on demand. Restart by calling `iterate` again.
    pub async fn iterate(
        &self,
    ) -> Result<BoxStream<'static, Result<Storage>>> {
        let rows = sqlx::query(
            "SELECT storage_id FROM ledgers WHERE deleted = 0
             ORDER BY created ASC",
        )
        .fetch_all(self.driver.registry())
        .await?;
        let ids: Vec<String> =
            rows.into_iter().map(|row| row.get("storage_id")).collect();

        let ledgers = self.clone();
        Ok(stream::iter(ids)
            .then(move |id| {
                let ledgers = ledgers.clone();
                async move { ledgers.get(&id).await }
            })
            .boxed())
    }

    fn build_handle(
        &self,
        pool: SqlitePool,
        storage_id: String,
        ledger_id: String,
        ledger_node_id: String,
        plugins: &[Arc<dyn StoragePlugin>],
    ) -> Result<Storage> {
        let hasher = self.driver.hasher();

        let operations = OperationStore::new(
            pool.clone(),
            hasher.clone(),
            self.driver.params(),
        );
        let events = EventStore::new(pool.clone(), operations.clone());
        let blocks = BlockStore::new(
            pool.clone(),
            hasher,
            ledger_node_id.clone(),
            self.notifier.clone(),
            events.clone(),
        );

        let stores = StoreSet {
            blocks,
            events,
            operations,
        };
        let mut bound = HashMap::new();
        for plugin in plugins {
            bound.insert(plugin.name().to_owned(), plugin.bind(&stores)?);
        }

        Ok(Storage {
            id: storage_id,
            ledger_id,
            ledger_node_id,
            blocks: stores.blocks,
            events: stores.events,
            operations: stores.operations,
            plugins: bound,
            pool,
        })
    }
}

/// Composite handle to one ledger's collection set.
#[derive(Clone)]
pub struct Storage {
    /// Storage UUID allocated at `add`.
    pub id: String,
    pub ledger_id: String,
    pub ledger_node_id: String,

    pub blocks: BlockStore,
    pub events: EventStore,
    pub operations: OperationStore,

    plugins: HashMap<String, Arc<dyn Any + Send + Sync>>,
    pool: SqlitePool,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("ledger_id", &self.ledger_id)
            .field("ledger_node_id", &self.ledger_node_id)
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Escape hatch to the raw collection-set database.
    pub fn driver(&self) -> &SqlitePool {
        &self.pool
    }

    /// Typed access to a bound plugin API.
    pub fn plugin<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>> {
        let api = self
            .plugins
            .get(name)
            .ok_or_else(|| StorageError::not_found("plugin", name))?;
        api.clone().downcast::<T>().map_err(|_| {
            StorageError::bad_type(format!(
                "plugin `{name}` does not expose the requested API"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::StreamExt;
    use ledger_data::ledger::faker::gen_operation;

    use crate::driver::Blake2bHasher;
    use crate::indexes::Collection;
    use crate::operations::OperationLookup;
    use crate::plugins::PluginKind;
    use crate::testing::TestLedger;

    use super::*;

    #[tokio::test]
    async fn add_get_remove_lifecycle() {
        let dir = tempfile::TempDir::with_prefix("registry-lifecycle")
            .expect("tempdir");
        let ledgers = Ledgers::create_or_open(
            dir.path(),
            Params::default(),
            Arc::new(Blake2bHasher),
        )
        .await;

        let storage = ledgers
            .add("did:v1:test", "urn:uuid:node-1", &[])
            .await
            .expect("ledger allocates");
        assert_eq!(storage.ledger_id, "did:v1:test");

        // Same ledgerId cannot be added twice.
        let err = ledgers
            .add("did:v1:test", "urn:uuid:node-1", &[])
            .await
            .expect_err("duplicate ledgerId");
        assert_eq!(err.name(), "DuplicateError");

        // The handle reopens by storage id.
        let reopened =
            ledgers.get(&storage.id).await.expect("handle reopens");
        assert_eq!(reopened.ledger_node_id, "urn:uuid:node-1");

        // Writes through one handle are visible through the other.
        let op = gen_operation("urn:r1", "he1", 0);
        let hash = op.meta.operation_hash.clone();
        storage
            .operations
            .add_many(vec![op], true)
            .await
            .expect("operations persist");
        assert!(reopened
            .operations
            .exists(&OperationLookup::hash(hash))
            .await
            .expect("lookup"));

        ledgers.remove(&storage.id).await.expect("soft delete");
        let err = ledgers
            .get(&storage.id)
            .await
            .expect_err("now invisible");
        assert_eq!(err.name(), "NotFound");
        let err = ledgers
            .remove(&storage.id)
            .await
            .expect_err("already deleted");
        assert_eq!(err.name(), "NotFound");

        // The ledgerId becomes available again.
        ledgers
            .add("did:v1:test", "urn:uuid:node-1", &[])
            .await
            .expect("re-allocation after removal");
    }

    #[tokio::test]
    async fn iterate_walks_live_ledgers_in_creation_order() {
        let dir = tempfile::TempDir::with_prefix("registry-iterate")
            .expect("tempdir");
        let ledgers = Ledgers::create_or_open(
            dir.path(),
            Params::default(),
            Arc::new(Blake2bHasher),
        )
        .await;

        let a = ledgers
            .add("did:v1:a", "urn:uuid:node-1", &[])
            .await
            .expect("ledger a");
        let b = ledgers
            .add("did:v1:b", "urn:uuid:node-1", &[])
            .await
            .expect("ledger b");
        let c = ledgers
            .add("did:v1:c", "urn:uuid:node-1", &[])
            .await
            .expect("ledger c");
        ledgers.remove(&b.id).await.expect("soft delete");

        let visited: Vec<String> = ledgers
            .iterate()
            .await
            .expect("stream")
            .map(|handle| handle.expect("handle opens").id)
            .collect()
            .await;
        assert_eq!(visited, vec![a.id.clone(), c.id.clone()]);

        // A fresh call restarts the walk.
        let recount = ledgers
            .iterate()
            .await
            .expect("stream")
            .count()
            .await;
        assert_eq!(recount, 2);
    }

    /// Per-record operation statistics, the kind of helper a ledger
    /// storage plugin typically contributes.
    struct RecordStatsPlugin;

    struct RecordStats {
        operations: OperationStore,
    }

    impl RecordStats {
        async fn operation_count(&self) -> crate::errors::Result<u64> {
            self.operations.get_count().await
        }
    }

    #[async_trait]
    impl StoragePlugin for RecordStatsPlugin {
        fn name(&self) -> &'static str {
            "record-stats"
        }

        fn kind(&self) -> PluginKind {
            PluginKind::LedgerStorage
        }

        async fn expand_indexes(
            &self,
            indexes: &IndexBuilder<'_>,
        ) -> crate::errors::Result<()> {
            indexes
                .create_index(
                    Collection::Operation,
                    "operation.recordId.record-stats.1",
                    &["record_id", "event_order"],
                    false,
                )
                .await
        }

        fn bind(
            &self,
            stores: &StoreSet,
        ) -> crate::errors::Result<Arc<dyn Any + Send + Sync>> {
            Ok(Arc::new(RecordStats {
                operations: stores.operations.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn plugins_expand_indexes_and_bind_apis() {
        plugins::register(Arc::new(RecordStatsPlugin))
            .expect("plugin registers");

        let dir = tempfile::TempDir::with_prefix("registry-plugins")
            .expect("tempdir");
        let ledgers = Ledgers::create_or_open(
            dir.path(),
            Params::default(),
            Arc::new(Blake2bHasher),
        )
        .await;

        let storage = ledgers
            .add("did:v1:plugged", "urn:uuid:node-1", &["record-stats"])
            .await
            .expect("ledger with plugin");

        // The plugin index landed next to the core ones.
        let names: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'index'
             AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(storage.driver())
        .await
        .expect("index listing")
        .into_iter()
        .map(|row| row.get("name"))
        .collect();
        assert!(names
            .iter()
            .any(|n| n == "operation.recordId.record-stats.1"));

        // The bound API reads through the ledger's own stores.
        let op = gen_operation("urn:r1", "he1", 0);
        storage
            .operations
            .add_many(vec![op], true)
            .await
            .expect("operations persist");

        let stats = storage
            .plugin::<RecordStats>("record-stats")
            .expect("bound API");
        assert_eq!(stats.operation_count().await.expect("count"), 1);

        // Unknown names and wrong types are surfaced.
        assert!(storage.plugin::<RecordStats>("absent").is_err());
        assert!(storage.plugin::<u32>("record-stats").is_err());

        // Rebinding happens on reopen too.
        let reopened = ledgers.get(&storage.id).await.expect("reopen");
        let stats = reopened
            .plugin::<RecordStats>("record-stats")
            .expect("rebound API");
        assert_eq!(stats.operation_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn unregistered_plugins_block_ledger_creation() {
        let t = TestLedger::create("registry-unknown-plugin").await;
        let err = t
            .ledgers
            .add("did:v1:other", "urn:uuid:node-1", &["no-such-plugin"])
            .await
            .expect_err("unknown plugin");
        assert_eq!(err.name(), "InvalidAccess");
    }
}
