// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EventRecord;

/// Block type emitted by a Web Ledger node.
pub const WEB_LEDGER_EVENT_BLOCK: &str = "WebLedgerEventBlock";

/// Semantic payload of a block.
///
/// A stored block never carries its events inline: `event` is an ordered
/// list of event hashes (`Block<String>`). Reads that expand events yield
/// `Block<EventRecord>` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block<E = String> {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<Value>,

    pub id: String,

    #[serde(rename = "type")]
    pub block_type: String,

    pub block_height: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,

    /// Ordered event list; hashes when stored, full records when expanded.
    #[serde(default = "Vec::new")]
    pub event: Vec<E>,

    /// Fields the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<E> Block<E> {
    /// Rebuilds this block around a different event representation,
    /// keeping every other payload field.
    pub fn with_events<T>(self, event: Vec<T>) -> Block<T> {
        Block {
            context: self.context,
            id: self.id,
            block_type: self.block_type,
            block_height: self.block_height,
            consensus_method: self.consensus_method,
            previous_block: self.previous_block,
            previous_block_hash: self.previous_block_hash,
            event,
            extra: self.extra,
        }
    }
}

/// Storage meta of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub block_hash: String,

    #[serde(default)]
    pub consensus: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_date: Option<u64>,

    #[serde(default)]
    pub created: u64,

    #[serde(default)]
    pub updated: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

impl BlockMeta {
    pub fn new<S: Into<String>>(block_hash: S) -> Self {
        Self {
            block_hash: block_hash.into(),
            consensus: false,
            consensus_date: None,
            created: 0,
            updated: 0,
            deleted: None,
        }
    }

    pub fn with_consensus(mut self, consensus_date: u64) -> Self {
        self.consensus = true;
        self.consensus_date = Some(consensus_date);
        self
    }
}

/// A `{block, meta}` pair as persisted or returned by the block store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord<E = String> {
    pub block: Block<E>,
    pub meta: BlockMeta,
}

/// Stored form: events as hashes.
pub type StoredBlock = BlockRecord<String>;

/// Expanded form: events hydrated, ordered by `meta.blockOrder`.
pub type ExpandedBlock = BlockRecord<EventRecord>;

/// Projection of a block without its event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<Value>,

    pub id: String,

    #[serde(rename = "type")]
    pub block_type: String,

    pub block_height: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,

    /// Ordered event-hash list, attached only on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Vec<String>>,

    pub meta: BlockMeta,
}

impl BlockSummary {
    /// Builds the projection from a stored block, dropping the event list.
    pub fn from_stored(record: StoredBlock) -> Self {
        let StoredBlock { block, meta } = record;
        Self {
            context: block.context,
            id: block.id,
            block_type: block.block_type,
            block_height: block.block_height,
            consensus_method: block.consensus_method,
            previous_block: block.previous_block,
            previous_block_hash: block.previous_block_hash,
            event: None,
            meta,
        }
    }
}

#[cfg(any(feature = "faker", test))]
pub mod faker {
    use fake::{Dummy, Faker};
    use rand::Rng;

    use super::*;

    impl Dummy<Faker> for Block {
        /// A block with a random id and height and no events.
        fn dummy_with_rng<R: Rng + ?Sized>(
            _config: &Faker,
            rng: &mut R,
        ) -> Self {
            Block {
                context: None,
                id: format!("urn:block:{:08x}", rng.gen::<u32>()),
                block_type: WEB_LEDGER_EVENT_BLOCK.to_owned(),
                block_height: rng.gen_range(1..1_000_000),
                consensus_method: Some("Continuity2017".to_owned()),
                previous_block: None,
                previous_block_hash: None,
                event: vec![],
                extra: Map::new(),
            }
        }
    }

    /// A block payload/meta pair referencing the given event hashes.
    pub fn gen_block(
        id: &str,
        block_height: u64,
        event: Vec<String>,
        block_hash: &str,
        consensus: bool,
    ) -> StoredBlock {
        let block = Block {
            context: None,
            id: id.to_owned(),
            block_type: WEB_LEDGER_EVENT_BLOCK.to_owned(),
            block_height,
            consensus_method: Some("Continuity2017".to_owned()),
            previous_block: None,
            previous_block_hash: None,
            event,
            extra: Map::new(),
        };
        let mut meta = BlockMeta::new(block_hash);
        if consensus {
            meta = meta.with_consensus(crate::now_millis());
        }
        StoredBlock { block, meta }
    }
}
