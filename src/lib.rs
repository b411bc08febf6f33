// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod blocks;
mod chain;
mod chain_sync;
mod cli_shared;
mod crypto;
mod daemon;
mod db;
mod genesis;
mod interpreter;
mod message;
mod message_pool;
mod metrics;
mod node_api;
#[cfg(test)]
mod test_utils;
mod utils;

pub use cli_shared::cli::{CliOpts, Config};
pub use daemon::main::main as tipchain_main;
