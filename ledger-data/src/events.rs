// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Notification types published by the storage engine.

use serde_json::Value;

/// A notification as delivered to subscribers.
#[derive(Clone, Debug)]
pub struct Notification {
    pub component: &'static str,
    pub topic: &'static str,
    pub entity: String,
    pub data: Option<Value>,
}

pub trait NotificationSource {
    const COMPONENT: &'static str;

    fn topic(&self) -> &'static str;
    fn entity(&self) -> String;
    fn data(&self) -> Option<Value>;
}

impl<NS: NotificationSource> From<NS> for Notification {
    fn from(value: NS) -> Self {
        Self {
            component: NS::COMPONENT,
            topic: value.topic(),
            entity: value.entity(),
            data: value.data(),
        }
    }
}

/// Block lifecycle notifications.
#[derive(Clone, Debug)]
pub enum BlockEvent {
    /// A block was persisted.
    Added {
        block_hash: String,
        block_height: u64,
        ledger_node_id: String,
    },
}

impl NotificationSource for BlockEvent {
    const COMPONENT: &'static str = "block";

    fn topic(&self) -> &'static str {
        match self {
            Self::Added { .. } => "add",
        }
    }

    fn entity(&self) -> String {
        match self {
            Self::Added { block_hash, .. } => block_hash.clone(),
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            Self::Added {
                block_height,
                ledger_node_id,
                ..
            } => Some(serde_json::json!({
                "blockHeight": block_height,
                "ledgerNodeId": ledger_node_id,
            })),
        }
    }
}
