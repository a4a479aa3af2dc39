// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::conf::Params;
use crate::errors::Result;

/// The global registry database.
const REGISTRY_DB_NAME: &str = "ledgers.sqlite3";

/// Produces short deterministic tokens suitable for indexed keys.
///
/// The consensus layer supplies the hash function it addresses blocks and
/// events with; the engine only ever treats the output as an opaque key.
pub trait Hasher: Send + Sync + 'static {
    fn hash(&self, data: &[u8]) -> String;
}

/// Default hasher: BLAKE2b-256, base58-encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake2bHasher;

impl Hasher for Blake2bHasher {
    fn hash(&self, data: &[u8]) -> String {
        let digest = blake2b_simd::Params::new().hash_length(32).hash(data);
        bs58::encode(digest.as_bytes()).into_string()
    }
}

/// Connection management for the registry database and every per-ledger
/// collection set.
///
/// The driver is process-shared: cloning it clones the pool handles, and
/// per-ledger pools are opened once and cached for the life of the
/// process.
#[derive(Clone)]
pub struct Driver {
    base: PathBuf,
    params: Params,
    hasher: Arc<dyn Hasher>,
    registry: SqlitePool,
    ledgers: Arc<RwLock<HashMap<String, SqlitePool>>>,
}

impl Driver {
    /// Creates or opens the storage directory and its registry database.
    ///
    /// Panics if the directory or the registry database cannot be opened.
    pub async fn create_or_open<P: AsRef<Path>>(
        base: P,
        params: Params,
        hasher: Arc<dyn Hasher>,
    ) -> Self {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)
            .expect("creating the storage directory should not fail");

        info!("Opening ledger storage in {base:?}, {params}");

        let registry =
            open_pool(&base.join(REGISTRY_DB_NAME), &params, true)
                .await
                .expect("the registry database should open");

        Self {
            base,
            params,
            hasher,
            registry,
            ledgers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Pool of the registry database.
    pub(crate) fn registry(&self) -> &SqlitePool {
        &self.registry
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    pub fn hasher(&self) -> Arc<dyn Hasher> {
        self.hasher.clone()
    }

    /// Hash with the configured hash function.
    pub fn hash(&self, data: &[u8]) -> String {
        self.hasher.hash(data)
    }

    /// Opens (or returns the cached pool of) the collection set database
    /// identified by `storage_id`.
    pub(crate) async fn ledger_pool(
        &self,
        storage_id: &str,
        create: bool,
    ) -> Result<SqlitePool> {
        if let Some(pool) = self.ledgers.read().await.get(storage_id) {
            return Ok(pool.clone());
        }

        let path = self.ledger_db_path(storage_id);
        let pool = open_pool(&path, &self.params, create).await?;

        let mut cache = self.ledgers.write().await;
        let pool = cache
            .entry(storage_id.to_owned())
            .or_insert(pool)
            .clone();
        Ok(pool)
    }

    fn ledger_db_path(&self, storage_id: &str) -> PathBuf {
        self.base.join(format!("{storage_id}.sqlite3"))
    }
}

async fn open_pool(
    path: &Path,
    params: &Params,
    create: bool,
) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(params.max_pool_connections)
        .acquire_timeout(params.acquire_timeout)
        .connect_with(options)
        .await?;

    Ok(pool)
}
