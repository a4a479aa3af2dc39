// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Storage engine for a Web Ledger node.
//!
//! A ledger is a persistent, append-mostly store of hash-linked blocks,
//! their events and the operations those events carry. The [`Ledgers`]
//! registry allocates one collection set per ledger and hands out a
//! composite [`Storage`] handle exposing the block, event and operation
//! stores, plus any bound plugin APIs.
//!
//! Writes are bottom-up: operations first, then the event listing them,
//! then the block sealing the events. Writes are never retracted; removal
//! is a soft delete and reads exclude soft-deleted documents by default.
//! The canonical order of the resulting stream is
//! `(blockHeight, blockOrder, eventOrder)`.

pub mod blocks;
pub mod conf;
pub mod driver;
pub mod errors;
pub mod events;
pub mod indexes;
pub mod operations;
pub mod plugins;
pub mod registry;

pub use conf::Params;
pub use driver::{Blake2bHasher, Hasher};
pub use errors::{Result, StorageError};
pub use registry::{Ledgers, Storage};
