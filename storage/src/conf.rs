// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Formatter;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Params {
    /// Max number of connections per database pool.
    pub max_pool_connections: u32,

    /// How long an operation waits for a pooled connection before it
    /// times out.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Max documents per unordered insert chunk.
    pub insert_chunk_max_docs: usize,

    /// Max estimated serialized size per unordered insert chunk.
    pub insert_chunk_max_bytes: usize,

    /// Capacity of the notification broadcast channel.
    pub notification_channel_capacity: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_pool_connections: 16,
            acquire_timeout: Duration::from_secs(5),
            insert_chunk_max_docs: 250,
            // 95% of the 16 MiB document-batch ceiling.
            insert_chunk_max_bytes: (16 * 1024 * 1024) * 95 / 100,
            notification_channel_capacity: 256,
        }
    }
}

impl std::fmt::Display for Params {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "max_pool_connections: {}, \
             acquire_timeout: {:?}, \
             insert_chunk_max_docs: {}, \
             insert_chunk_max_bytes: {}, \
             notification_channel_capacity: {}",
            self.max_pool_connections,
            self.acquire_timeout,
            self.insert_chunk_max_docs,
            self.insert_chunk_max_bytes,
            self.notification_channel_capacity,
        )
    }
}
