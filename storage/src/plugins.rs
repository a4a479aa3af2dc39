// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process-wide plugin registry and the binding host.
//!
//! Plugins register once at startup; the registry is immutable
//! afterwards. At ledger creation a plugin may install additional
//! indexes, and on handle construction its API object is bound against
//! the concrete stores and exposed under the plugin's own name.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;

use crate::blocks::BlockStore;
use crate::errors::{Result, StorageError};
use crate::events::EventStore;
use crate::indexes::IndexBuilder;
use crate::operations::OperationStore;

/// Declared plugin kind. Only ledger storage plugins may be attached to
/// a ledger's collection set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginKind {
    LedgerStorage,
    Other(&'static str),
}

/// The concrete stores a plugin's API binds against.
///
/// Bound methods receive these as their receiver-equivalent: a plugin
/// API holds the store handles it needs, including their collection
/// pools and hashing utility.
#[derive(Clone)]
pub struct StoreSet {
    pub blocks: BlockStore,
    pub events: EventStore,
    pub operations: OperationStore,
}

impl fmt::Debug for dyn StoragePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoragePlugin")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

#[async_trait]
pub trait StoragePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> PluginKind {
        PluginKind::LedgerStorage
    }

    /// Invoked at ledger creation, after the core indexes exist.
    async fn expand_indexes(
        &self,
        indexes: &IndexBuilder<'_>,
    ) -> Result<()> {
        let _ = indexes;
        Ok(())
    }

    /// Builds the plugin's API object for one ledger handle. The result
    /// is exposed via `Storage::plugin::<T>(name)`.
    fn bind(&self, stores: &StoreSet) -> Result<Arc<dyn Any + Send + Sync>>;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn StoragePlugin>>> {
    static REGISTRY: OnceLock<
        RwLock<HashMap<String, Arc<dyn StoragePlugin>>>,
    > = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Registers a plugin process-wide. Names are the dispatch namespace,
/// so a second registration under the same name is a `DuplicateError`.
pub fn register(plugin: Arc<dyn StoragePlugin>) -> Result<()> {
    let mut plugins = registry().write().expect("plugin registry lock");
    if plugins.contains_key(plugin.name()) {
        return Err(StorageError::duplicate("plugin", plugin.name()));
    }
    plugins.insert(plugin.name().to_owned(), plugin);
    Ok(())
}

/// Resolves registered ledger storage plugins by name.
pub(crate) fn resolve(
    names: &[&str],
) -> Result<Vec<Arc<dyn StoragePlugin>>> {
    let plugins = registry().read().expect("plugin registry lock");
    names
        .iter()
        .map(|name| {
            let plugin = plugins.get(*name).ok_or_else(|| {
                StorageError::invalid_access(format!(
                    "plugin `{name}` is not registered"
                ))
            })?;
            if plugin.kind() != PluginKind::LedgerStorage {
                return Err(StorageError::invalid_access(format!(
                    "plugin `{name}` is not a ledger storage plugin"
                )));
            }
            Ok(plugin.clone())
        })
        .collect()
}
