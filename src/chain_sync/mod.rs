// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod bad_block_cache;
mod chain_engine;
pub mod consensus;
pub mod metrics;
pub mod network;
mod sync_state;
mod tipset_syncer;
mod validation;

pub use self::{
    bad_block_cache::BadBlockCache,
    chain_engine::{ChainEngine, SyncConfig, SyncOutcome},
    consensus::{ProofVerifier, SignatureTicketVerifier},
    network::{BlockFetcher, FetchError, OfflineFetcher, PeerId},
    sync_state::{SyncStage, SyncState},
    tipset_syncer::SyncError,
    validation::{
        BlockValidationError, MessageValidationError, MessageValidator, PoolView, Validator,
    },
};
