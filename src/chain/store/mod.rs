// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod chain_store;
mod errors;
pub mod index;
mod tipset_tracker;

pub use self::{
    chain_store::{ChainStore, HeadChange},
    errors::Error,
    index::{ReorgDelta, TipsetIndex, TipsetMeta},
};
