// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Narrow capability interfaces over the node core. Each consumer depends on
//! the one capability it needs instead of the whole node.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use tokio::sync::broadcast::Receiver as Subscriber;

use crate::blocks::{Block, Tipset, TipsetKey};
use crate::chain::{HeadChange, Weight};
use crate::chain_sync::{ChainEngine, PeerId, SyncError, SyncOutcome, SyncState};
use crate::crypto::Address;
use crate::message::SignedMessage;
use crate::message_pool::{Error as MpoolError, MessagePool, Provider};

/// Read access to the canonical chain.
pub trait ChainApi: Send + Sync {
    fn head(&self) -> Arc<Tipset>;
    fn weight(&self, key: &TipsetKey) -> Option<Weight>;
    fn tipset(&self, key: &TipsetKey) -> Option<Arc<Tipset>>;
    /// Up to `limit` tipsets from `from` towards genesis, `from` included.
    fn ancestors(&self, from: &TipsetKey, limit: usize) -> Vec<Arc<Tipset>>;
    fn subscribe_head_change(&self) -> Subscriber<Arc<HeadChange>>;
    fn sync_states(&self) -> Vec<SyncState>;
}

/// Entry point for blocks announced by peers.
#[async_trait]
pub trait BlockApi: Send + Sync {
    async fn submit_block(
        &self,
        raw: &[u8],
        source: Option<PeerId>,
    ) -> Result<SyncOutcome, SyncError>;
}

/// Pending message submission and inspection.
pub trait MpoolApi: Send + Sync {
    fn push(&self, msg: SignedMessage) -> Result<Cid, MpoolError>;
    fn push_raw(&self, bytes: &[u8]) -> Result<Cid, MpoolError>;
    fn pending(&self) -> Vec<SignedMessage>;
    /// Sequence a wallet should use for the next message of `addr`.
    fn next_sequence(&self, addr: &Address) -> Result<u64, MpoolError>;
}

/// Tipset a new block extends, with the state its messages execute on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiningBase {
    pub tipset: Arc<Tipset>,
    /// Post-execution state of `tipset`, the `state_root` of a child header.
    pub state_root: Cid,
}

/// What a block producer needs from the node.
#[async_trait]
pub trait MiningApi: Send + Sync {
    /// The tipset the pending messages were validated against, so that
    /// selected messages apply on top of it.
    fn mining_base(&self) -> anyhow::Result<MiningBase>;
    fn select_messages(&self, max_count: usize, max_size: usize) -> Vec<SignedMessage>;
    async fn submit_mined_block(&self, block: Block) -> Result<SyncOutcome, SyncError>;
}

impl<DB> ChainApi for ChainEngine<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    fn head(&self) -> Arc<Tipset> {
        ChainEngine::head(self)
    }

    fn weight(&self, key: &TipsetKey) -> Option<Weight> {
        ChainEngine::weight(self, key)
    }

    fn tipset(&self, key: &TipsetKey) -> Option<Arc<Tipset>> {
        ChainEngine::tipset(self, key)
    }

    fn ancestors(&self, from: &TipsetKey, limit: usize) -> Vec<Arc<Tipset>> {
        self.chain_store().ancestors(from, limit)
    }

    fn subscribe_head_change(&self) -> Subscriber<Arc<HeadChange>> {
        ChainEngine::subscribe_head_change(self)
    }

    fn sync_states(&self) -> Vec<SyncState> {
        ChainEngine::sync_states(self)
    }
}

#[async_trait]
impl<DB> BlockApi for ChainEngine<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    async fn submit_block(
        &self,
        raw: &[u8],
        source: Option<PeerId>,
    ) -> Result<SyncOutcome, SyncError> {
        ChainEngine::submit_block(self, raw, source).await
    }
}

impl<T> MpoolApi for MessagePool<T>
where
    T: Provider + Send + Sync,
{
    fn push(&self, msg: SignedMessage) -> Result<Cid, MpoolError> {
        self.add(msg)
    }

    fn push_raw(&self, bytes: &[u8]) -> Result<Cid, MpoolError> {
        MessagePool::push_raw(self, bytes)
    }

    fn pending(&self) -> Vec<SignedMessage> {
        MessagePool::pending(self).0
    }

    fn next_sequence(&self, addr: &Address) -> Result<u64, MpoolError> {
        self.get_sequence(addr)
    }
}

/// [`MiningApi`] backed by the chain engine and the message pool.
pub struct MiningService<DB, T> {
    engine: Arc<ChainEngine<DB>>,
    mpool: Arc<MessagePool<T>>,
}

impl<DB, T> MiningService<DB, T> {
    pub fn new(engine: Arc<ChainEngine<DB>>, mpool: Arc<MessagePool<T>>) -> Self {
        Self { engine, mpool }
    }
}

#[async_trait]
impl<DB, T> MiningApi for MiningService<DB, T>
where
    DB: Blockstore + Send + Sync + 'static,
    T: Provider + Send + Sync,
{
    fn mining_base(&self) -> anyhow::Result<MiningBase> {
        let tipset = self.mpool.current_tipset();
        let meta = self
            .engine
            .chain_store()
            .tipset_meta(tipset.key())
            .with_context(|| format!("mining base {} is not indexed", tipset.key()))?;
        Ok(MiningBase {
            tipset,
            state_root: meta.state_root,
        })
    }

    fn select_messages(&self, max_count: usize, max_size: usize) -> Vec<SignedMessage> {
        self.mpool.select_for_block(max_count, max_size)
    }

    async fn submit_mined_block(&self, block: Block) -> Result<SyncOutcome, SyncError> {
        self.engine.submit_full_block(block, None).await
    }
}

/// Every capability of a running node.
#[derive(Clone)]
pub struct NodeApi {
    pub chain: Arc<dyn ChainApi>,
    pub blocks: Arc<dyn BlockApi>,
    pub mpool: Arc<dyn MpoolApi>,
    pub mining: Arc<dyn MiningApi>,
}

impl NodeApi {
    pub fn new<DB, T>(engine: Arc<ChainEngine<DB>>, mpool: Arc<MessagePool<T>>) -> Self
    where
        DB: Blockstore + Send + Sync + 'static,
        T: Provider + Send + Sync + 'static,
    {
        Self {
            chain: engine.clone(),
            blocks: engine.clone(),
            mining: Arc::new(MiningService::new(engine, mpool.clone())),
            mpool,
        }
    }
}
