// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT
mod config;
mod errors;
pub mod metrics;
mod msgpool;

pub use self::{
    config::*,
    errors::*,
    msgpool::{
        msg_pool::{MessagePool, MsgSet, PoolEntry},
        provider::{MpoolChainProvider, Provider},
    },
};
