// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod block;
pub use block::*;

mod event;
pub use event::*;

mod operation;
pub use operation::*;

#[cfg(any(feature = "faker", test))]
pub mod faker {
    pub use super::block::faker::gen_block;
    pub use super::event::faker::{gen_config_event, gen_operation_event};
    pub use super::operation::faker::gen_operation;
}
