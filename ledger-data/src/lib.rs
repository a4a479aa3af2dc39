// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod events;
pub mod ledger;
pub mod patch;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All `created`/`updated`/`deleted` meta timestamps use this resolution.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Encode a hash token into a shortened representation for logging.
pub fn to_str(token: &str) -> String {
    const OFFSET: usize = 16;
    if token.len() <= 2 * OFFSET {
        return token.to_owned();
    }

    let first: String = token.chars().take(OFFSET).collect();
    let last: String = {
        let mut tail: Vec<char> = token.chars().rev().take(OFFSET).collect();
        tail.reverse();
        tail.into_iter().collect()
    };

    format!("{first}...{last}")
}
