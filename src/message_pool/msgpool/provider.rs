// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use anyhow::Context as _;
use fvm_ipld_blockstore::Blockstore;
use tokio::sync::broadcast::Receiver as Subscriber;

use crate::blocks::{FullTipset, Tipset, TipsetKey};
use crate::chain::{ChainStore, HeadChange};
use crate::chain_sync::ChainEngine;
use crate::crypto::Address;
use crate::interpreter::{ActorState, StateTransition};
use crate::message::SignedMessage;
use crate::message_pool::errors::Error;

/// Provider Trait. This trait will be used by the message pool to interact
/// with some medium in order to do the operations that are listed below that
/// are required for the message pool.
pub trait Provider {
    /// Update `Mpool`'s `cur_tipset` whenever there is a change to the
    /// provider
    fn subscribe_head_changes(&self) -> Subscriber<Arc<HeadChange>>;
    /// Get the heaviest Tipset in the provider
    fn get_heaviest_tipset(&self) -> Arc<Tipset>;
    /// Account state after the messages of `ts` are executed. Unknown
    /// accounts have sequence zero and no funds.
    fn get_actor_after(&self, addr: &Address, ts: &Tipset) -> Result<ActorState, Error>;
    /// Messages of a tipset in execution order, without duplicates.
    fn messages_for_tipset(&self, ts: &Tipset) -> Result<Vec<SignedMessage>, Error>;
    /// Return a tipset given the tipset keys from the `ChainStore`
    fn load_tipset(&self, key: &TipsetKey) -> Result<Arc<Tipset>, Error>;
}

/// This is the default Provider implementation that will be used for the
/// `mpool` RPC.
pub struct MpoolChainProvider<DB> {
    chain_store: Arc<ChainStore<DB>>,
    state_transition: Arc<dyn StateTransition>,
}

impl<DB> MpoolChainProvider<DB> {
    pub fn new(
        chain_store: Arc<ChainStore<DB>>,
        state_transition: Arc<dyn StateTransition>,
    ) -> Self {
        MpoolChainProvider {
            chain_store,
            state_transition,
        }
    }
}

impl<DB> MpoolChainProvider<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    pub fn from_engine(engine: &ChainEngine<DB>) -> Self {
        Self::new(
            engine.chain_store().clone(),
            engine.state_transition().clone(),
        )
    }
}

impl<DB> Provider for MpoolChainProvider<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    fn subscribe_head_changes(&self) -> Subscriber<Arc<HeadChange>> {
        self.chain_store.subscribe()
    }

    fn get_heaviest_tipset(&self) -> Arc<Tipset> {
        self.chain_store.heaviest_tipset()
    }

    fn get_actor_after(&self, addr: &Address, ts: &Tipset) -> Result<ActorState, Error> {
        let meta = self
            .chain_store
            .tipset_meta(ts.key())
            .with_context(|| format!("tipset {} is not indexed", ts.key()))?;
        Ok(self
            .state_transition
            .actor(&meta.state_root, addr)?
            .unwrap_or_default())
    }

    fn messages_for_tipset(&self, ts: &Tipset) -> Result<Vec<SignedMessage>, Error> {
        let full = FullTipset::load(self.chain_store.blockstore(), ts.key())?
            .with_context(|| format!("messages of tipset {} not found", ts.key()))?;
        Ok(full.messages())
    }

    fn load_tipset(&self, key: &TipsetKey) -> Result<Arc<Tipset>, Error> {
        self.chain_store
            .tipset(key)
            .with_context(|| format!("tipset {key} is not indexed"))
            .map_err(Error::from)
    }
}
