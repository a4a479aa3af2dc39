// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Operation;

/// Kind of ledger activity an event carries.
///
/// The set is open: nodes may define additional event types, which the
/// engine stores without interpreting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "WebLedgerOperationEvent")]
    Operation,
    #[serde(rename = "WebLedgerConfigurationEvent")]
    Configuration,
    #[serde(untagged)]
    Other(String),
}

impl EventType {
    pub const OPERATION: &'static str = "WebLedgerOperationEvent";
    pub const CONFIGURATION: &'static str = "WebLedgerConfigurationEvent";

    pub fn as_str(&self) -> &str {
        match self {
            Self::Operation => Self::OPERATION,
            Self::Configuration => Self::CONFIGURATION,
            Self::Other(s) => s,
        }
    }

    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            Self::OPERATION => Self::Operation,
            Self::CONFIGURATION => Self::Configuration,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Semantic payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<Value>,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Ordered operation-hash list, required on operation events at write
    /// time. It is a join key, not content: the store strips it from the
    /// persisted payload and keeps it in the meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_hash: Option<Vec<String>>,

    /// Operation payloads, hydrated on reads of operation events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Vec<Operation>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Storage meta of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_hash: Option<Vec<String>>,

    #[serde(default)]
    pub consensus: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_date: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_order: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_configuration: Option<bool>,

    #[serde(default)]
    pub created: u64,

    #[serde(default)]
    pub updated: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

impl EventMeta {
    pub fn new<S: Into<String>>(event_hash: S) -> Self {
        Self {
            event_hash: event_hash.into(),
            operation_hash: None,
            consensus: false,
            consensus_date: None,
            block_height: None,
            block_order: None,
            effective_configuration: None,
            created: 0,
            updated: 0,
            deleted: None,
        }
    }

    pub fn at_position(mut self, block_height: u64, block_order: u64) -> Self {
        self.block_height = Some(block_height);
        self.block_order = Some(block_order);
        self
    }

    pub fn with_consensus(mut self, consensus_date: u64) -> Self {
        self.consensus = true;
        self.consensus_date = Some(consensus_date);
        self
    }
}

/// An `{event, meta}` pair as persisted or returned by the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: Event,
    pub meta: EventMeta,
}

#[cfg(any(feature = "faker", test))]
pub mod faker {
    use super::*;

    /// An operation event referencing the given operation hashes.
    pub fn gen_operation_event(
        event_hash: &str,
        operation_hashes: &[&str],
    ) -> EventRecord {
        let event = Event {
            context: None,
            event_type: EventType::Operation,
            operation_hash: Some(
                operation_hashes.iter().map(|h| (*h).to_owned()).collect(),
            ),
            operation: None,
            extra: Map::new(),
        };
        EventRecord {
            event,
            meta: EventMeta::new(event_hash),
        }
    }

    /// A configuration event at the given chain position, with consensus.
    pub fn gen_config_event(
        event_hash: &str,
        block_height: u64,
        block_order: u64,
    ) -> EventRecord {
        let mut extra = Map::new();
        extra.insert(
            "ledgerConfiguration".to_owned(),
            serde_json::json!({
                "type": "WebLedgerConfiguration",
                "consensusMethod": "Continuity2017",
            }),
        );
        let event = Event {
            context: None,
            event_type: EventType::Configuration,
            operation_hash: None,
            operation: None,
            extra,
        };
        let meta = EventMeta::new(event_hash)
            .at_position(block_height, block_order)
            .with_consensus(crate::now_millis());
        EventRecord { event, meta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tags_are_stable() {
        let op: EventType = serde_json::from_value(serde_json::json!(
            "WebLedgerOperationEvent"
        ))
        .expect("known tag");
        assert!(op.is_operation());

        let other: EventType =
            serde_json::from_value(serde_json::json!("ExoticEvent"))
                .expect("open tag");
        assert_eq!(other, EventType::Other("ExoticEvent".to_owned()));
        assert_eq!(
            serde_json::to_value(&other).expect("open tag"),
            serde_json::json!("ExoticEvent")
        );
    }

    #[test]
    fn operation_event_roundtrips() {
        let record = faker::gen_operation_event("he1", &["ho1", "ho2"]);
        let json = serde_json::to_value(&record).expect("event serializes");
        assert_eq!(json["event"]["type"], "WebLedgerOperationEvent");
        assert_eq!(json["event"]["operationHash"][1], "ho2");

        let back: EventRecord =
            serde_json::from_value(json).expect("event deserializes");
        assert_eq!(back, record);
    }

    #[test]
    fn config_event_carries_position() {
        let record = faker::gen_config_event("he2", 20, 0);
        assert!(record.event.event_type.is_configuration());
        assert_eq!(record.meta.block_height, Some(20));
        assert!(record.meta.consensus);
    }
}
