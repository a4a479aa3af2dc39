// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of record mutation an operation performs. Open set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "CreateWebLedgerRecord")]
    Create,
    #[serde(rename = "UpdateWebLedgerRecord")]
    Update,
    #[serde(untagged)]
    Other(String),
}

impl OperationType {
    pub const CREATE: &'static str = "CreateWebLedgerRecord";
    pub const UPDATE: &'static str = "UpdateWebLedgerRecord";

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => Self::CREATE,
            Self::Update => Self::UPDATE,
            Self::Other(s) => s,
        }
    }
}

/// Semantic payload of an operation: a single record-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<Value>,

    #[serde(rename = "type")]
    pub op_type: OperationType,

    /// Full record, present on create operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,

    /// Patch against an existing record, present on update operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_patch: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Operation {
    /// The logical record this operation addresses: `record.id` for
    /// creates, `recordPatch.target` for updates.
    pub fn record_target(&self) -> Option<&str> {
        if let Some(id) = self.record.as_ref().and_then(|r| r.get("id")) {
            return id.as_str();
        }
        self.record_patch
            .as_ref()
            .and_then(|p| p.get("target"))
            .and_then(Value::as_str)
    }
}

/// Storage meta of an operation.
///
/// `consensus`, `block_height` and `block_order` belong to the carrying
/// event; history reads populate them by joining the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMeta {
    pub event_hash: String,

    /// Position of this operation within its event.
    pub event_order: u64,

    pub operation_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_order: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

impl OperationMeta {
    pub fn new(
        event_hash: impl Into<String>,
        event_order: u64,
        operation_hash: impl Into<String>,
    ) -> Self {
        Self {
            event_hash: event_hash.into(),
            event_order,
            operation_hash: operation_hash.into(),
            consensus: None,
            block_height: None,
            block_order: None,
            deleted: None,
        }
    }
}

/// An `{operation, meta}` pair, with the denormalized record hash the
/// store computes on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub operation: Operation,
    pub meta: OperationMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

#[cfg(any(feature = "faker", test))]
pub mod faker {
    use fake::faker::lorem::en::Word;
    use fake::{Dummy, Fake, Faker};
    use rand::Rng;

    use super::*;

    impl Dummy<Faker> for Operation {
        /// A create operation for a random record.
        fn dummy_with_rng<R: Rng + ?Sized>(
            _config: &Faker,
            rng: &mut R,
        ) -> Self {
            Operation {
                context: None,
                op_type: OperationType::Create,
                record: Some(serde_json::json!({
                    "id": format!("urn:record:{:08x}", rng.gen::<u32>()),
                    "type": "WebLedgerRecord",
                })),
                record_patch: None,
                extra: Map::new(),
            }
        }
    }

    /// A create operation for `record`, positioned within `event_hash`.
    ///
    /// The operation hash is synthesized from the position so fixtures can
    /// cross-reference it without a real hasher.
    pub fn gen_operation(
        record: &str,
        event_hash: &str,
        event_order: u64,
    ) -> OperationRecord {
        let word: String = Word().fake();
        let operation = Operation {
            context: None,
            op_type: OperationType::Create,
            record: Some(serde_json::json!({
                "id": record,
                "type": "WebLedgerRecord",
                "label": word,
            })),
            record_patch: None,
            extra: Map::new(),
        };
        let operation_hash = format!("urn:hash:op:{event_hash}:{event_order}");
        OperationRecord {
            operation,
            meta: OperationMeta::new(
                event_hash.to_owned(),
                event_order,
                operation_hash,
            ),
            record_id: None,
        }
    }
}
