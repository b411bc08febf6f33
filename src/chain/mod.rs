// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod fork_choice;
pub mod store;
mod weight;

pub use self::{store::*, weight::*};
