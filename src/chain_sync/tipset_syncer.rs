// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    BadBlockCache, SyncConfig, SyncStage, SyncState,
    metrics,
    network::{BlockFetcher, FetchError, PeerId},
    validation::{BlockValidationError, Validator},
};
use crate::blocks::{Block, FullTipset, Tipset, TipsetKey};
use crate::chain::{ChainStore, Error as ChainStoreError, HeadChange, TipsetMeta, weight_delta};
use crate::interpreter::{ApplyError, StateTransition};
use crate::metrics::HistogramTimerExt as _;
use crate::utils::{RetryArgs, RetryError, retry};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no known ancestor within {0} tipsets")]
    ChainTooDeep(usize),
    #[error("Querying blocks from the network failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("block {cid} rejected: {reason}")]
    Rejected {
        cid: Cid,
        reason: BlockValidationError,
    },
    #[error("block {0} was previously marked bad")]
    KnownBad(Cid),
    #[error("applying messages of tipset {key} failed: {source}")]
    ApplyFailed {
        key: TipsetKey,
        #[source]
        source: ApplyError,
    },
    #[error("sync abandoned")]
    Abandoned,
    #[error("Chain store error: {0}")]
    Store(#[from] ChainStoreError),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Store(ChainStoreError::Store(anyhow::anyhow!("{err}")))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Store(ChainStoreError::Store(err))
    }
}

impl SyncError {
    /// The stage a request ends in when it fails with this error. Failing
    /// to obtain ancestors says nothing about the validity of the target.
    pub fn stage(&self) -> SyncStage {
        match self {
            SyncError::Abandoned | SyncError::Fetch(_) | SyncError::ChainTooDeep(_) => {
                SyncStage::Abandoned
            }
            _ => SyncStage::Rejected,
        }
    }
}

type Validated = (Arc<Tipset>, TipsetMeta);

/// Brings one target tipset and its missing ancestry into the chain store.
pub(in crate::chain_sync) struct TipsetSyncer<DB> {
    pub chain_store: Arc<ChainStore<DB>>,
    pub state_transition: Arc<dyn StateTransition>,
    pub validator: Arc<Validator>,
    pub fetcher: Arc<dyn BlockFetcher>,
    pub bad_block_cache: Arc<BadBlockCache>,
    pub config: SyncConfig,
}

impl<DB> TipsetSyncer<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    /// Runs a sync request to completion. Progress is reported in `state`.
    /// Returns the head change when the head moved.
    pub async fn sync(
        &self,
        target: FullTipset,
        source: Option<PeerId>,
        state: &RwLock<SyncState>,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<HeadChange>>, SyncError> {
        let _timer = metrics::TIPSET_PROCESSING_TIME.start_timer();
        state
            .write()
            .init(self.chain_store.heaviest_tipset(), Arc::new(target.to_tipset()));

        if let Some(bad) = target
            .blocks()
            .iter()
            .find(|b| self.bad_block_cache.peek(b.cid()).is_some())
        {
            return Err(SyncError::KnownBad(*bad.cid()));
        }

        state.write().set_stage(SyncStage::FetchingAncestors);
        let chain = self.fetch_ancestors(target, source, state, cancel).await?;
        debug!(
            "fetched {} tipsets, syncing from epoch {}",
            chain.len(),
            chain.first().map(FullTipset::epoch).unwrap_or_default()
        );

        state.write().set_stage(SyncStage::Validating);
        let batch = self.validate_chain(chain, state, cancel).await?;

        if cancel.is_cancelled() {
            return Err(SyncError::Abandoned);
        }
        state.write().set_stage(SyncStage::Applying);
        let change = self.chain_store.apply_batch(batch)?;
        state.write().set_stage(SyncStage::Committed);
        Ok(change)
    }

    /// Walks back from `target` until the parent is indexed. Returns the
    /// missing tipsets oldest first, `target` last.
    async fn fetch_ancestors(
        &self,
        target: FullTipset,
        source: Option<PeerId>,
        state: &RwLock<SyncState>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FullTipset>, SyncError> {
        target.persist(self.chain_store.blockstore())?;
        let mut parents = target.parents().clone();
        let mut chain = vec![target];
        while !self.chain_store.contains(&parents) {
            if cancel.is_cancelled() {
                return Err(SyncError::Abandoned);
            }
            if parents.is_empty() {
                // reached a genesis that is not ours
                let oldest = chain
                    .last()
                    .and_then(|ts| ts.blocks().first())
                    .map(|b| *b.cid())
                    .unwrap_or_default();
                return Err(SyncError::Rejected {
                    cid: oldest,
                    reason: BlockValidationError::Malformed(
                        "chain does not descend from the local genesis".into(),
                    ),
                });
            }
            if chain.len() > self.config.max_depth {
                return Err(SyncError::ChainTooDeep(self.config.max_depth));
            }
            let tipset = self.load_or_fetch(&parents, source.as_ref(), cancel).await?;
            state.write().set_epoch(tipset.epoch());
            parents = tipset.parents().clone();
            chain.push(tipset);
        }
        chain.reverse();
        Ok(chain)
    }

    async fn load_or_fetch(
        &self,
        key: &TipsetKey,
        source: Option<&PeerId>,
        cancel: &CancellationToken,
    ) -> Result<FullTipset, SyncError> {
        let db = self.chain_store.blockstore();
        let mut blocks = Vec::with_capacity(key.len());
        for cid in key.iter() {
            if self.bad_block_cache.peek(cid).is_some() {
                return Err(SyncError::KnownBad(*cid));
            }
            let block = match Block::load(db, *cid)? {
                Some(block) => block,
                None => {
                    let block = self.fetch_block(*cid, source, cancel).await?;
                    block.persist(db)?;
                    block
                }
            };
            blocks.push(block);
        }
        FullTipset::new(blocks).map_err(|e| SyncError::Rejected {
            cid: key.cids().first().copied().unwrap_or_default(),
            reason: BlockValidationError::Malformed(e.to_string()),
        })
    }

    async fn fetch_block(
        &self,
        cid: Cid,
        source: Option<&PeerId>,
        cancel: &CancellationToken,
    ) -> Result<Block, SyncError> {
        trace!("fetching block {cid}");
        let args = RetryArgs {
            timeout: Some(Duration::from_secs(self.config.fetch_timeout)),
            max_retries: Some(self.config.fetch_retries),
            delay: Some(Duration::from_millis(self.config.fetch_retry_delay_ms)),
        };
        let fetch = retry(args, || self.fetcher.fetch_block(cid, source.cloned()));
        let block = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Abandoned),
            res = fetch => match res {
                Ok(block) => block,
                Err(RetryError::TimeoutExceeded) => return Err(FetchError::Timeout(cid).into()),
                Err(RetryError::RetriesExceeded(e)) => return Err(e.into()),
            },
        };
        if block.cid() != &cid {
            return Err(FetchError::Mismatch {
                requested: cid,
                received: *block.cid(),
            }
            .into());
        }
        Ok(block)
    }

    /// Validates `chain` oldest first. Each tipset is checked against its
    /// parent, which is either earlier in `chain` or already indexed.
    async fn validate_chain(
        &self,
        chain: Vec<FullTipset>,
        state: &RwLock<SyncState>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Validated>, SyncError> {
        let mut batch: Vec<Validated> = Vec::with_capacity(chain.len() + 1);
        for full in chain {
            if cancel.is_cancelled() {
                return Err(SyncError::Abandoned);
            }
            state.write().set_epoch(full.epoch());
            let parent = self.parent_of(&batch, full.parents());
            let validated = self.validate_tipset(full, parent).await?;
            batch.push(validated);
        }

        // Blocks of the target epoch that arrived in earlier requests form a
        // heavier tipset together with the target.
        if let Some((target, _)) = batch.last() {
            let expanded = self.chain_store.expand_tipset(target)?;
            if expanded.len() > target.len() && !self.chain_store.contains(expanded.key()) {
                if let Some(full) = self.chain_store.load_full_tipset(expanded.key())? {
                    let parent = self.parent_of(&batch, full.parents());
                    match self.validate_tipset(full, parent).await {
                        Ok(validated) => batch.push(validated),
                        Err(e) => debug!("expanded tipset {} not usable: {e}", expanded.key()),
                    }
                }
            }
        }
        Ok(batch)
    }

    fn parent_of(&self, batch: &[Validated], key: &TipsetKey) -> Option<Validated> {
        batch
            .iter()
            .rev()
            .find(|(ts, _)| ts.key() == key)
            .cloned()
            .or_else(|| {
                self.chain_store.with_index(|index| {
                    Some((index.tipset(key)?.clone(), index.get(key)?.clone()))
                })
            })
    }

    /// Validates full blocks in the tipset in parallel, adding the successful
    /// ones to the tipset tracker and the failed ones to the bad block cache,
    /// then applies the tipset messages on top of the parent state.
    async fn validate_tipset(
        &self,
        full: FullTipset,
        parent: Option<Validated>,
    ) -> Result<Validated, SyncError> {
        if let Some(indexed) = self.parent_of(&[], full.key()) {
            trace!("tipset {} already indexed", full.key());
            return Ok(indexed);
        }

        let mut validations = JoinSet::new();
        for block in full.blocks().iter().cloned() {
            let validator = self.validator.clone();
            let parent = parent.clone();
            validations.spawn_blocking(move || {
                let parent = parent.as_ref().map(|(ts, meta)| (ts.as_ref(), meta));
                match validator.validate_block(&block, parent) {
                    Ok(()) => Ok(block),
                    Err(why) => Err((*block.cid(), why)),
                }
            });
        }
        while let Some(result) = validations.join_next().await {
            match result? {
                Ok(block) => {
                    block.persist(self.chain_store.blockstore())?;
                    self.chain_store.add_to_tipset_tracker(&block.header);
                }
                Err((cid, why)) => {
                    warn!("Validating block [CID = {cid}] in EPOCH = {} failed: {why}", full.epoch());
                    metrics::INVALID_TIPSET_TOTAL.inc();
                    if !matches!(why, BlockValidationError::StaleParent(_)) {
                        self.bad_block_cache.push(cid);
                    }
                    return Err(SyncError::Rejected { cid, reason: why });
                }
            }
        }
        let Some((parent, parent_meta)) = parent else {
            // every block would have failed with a stale parent
            return Err(SyncError::Rejected {
                cid: full.blocks().first().map(|b| *b.cid()).unwrap_or_default(),
                reason: BlockValidationError::StaleParent(full.parents().clone()),
            });
        };

        let key = full.key().clone();
        let messages = full.messages();
        let ret = {
            let state_transition = self.state_transition.clone();
            let state_root = parent_meta.state_root;
            tokio::task::spawn_blocking(move || state_transition.apply(&state_root, &messages))
                .await?
        };
        let ret = match ret {
            Ok(ret) => ret,
            Err(source) => {
                warn!("Applying messages of tipset {key} failed: {source}");
                metrics::INVALID_TIPSET_TOTAL.inc();
                // a lone block is invalid on its own, a combination of
                // individually valid blocks is not
                if let [block] = full.blocks() {
                    self.bad_block_cache.push(*block.cid());
                }
                return Err(SyncError::ApplyFailed { key, source });
            }
        };

        let tipset = Arc::new(full.into_tipset());
        let meta = TipsetMeta {
            weight: parent_meta.weight + weight_delta(&tipset),
            parent: Some(parent.key().clone()),
            state_root: ret.state_root,
            receipt_root: ret.receipt_root,
        };
        Ok((tipset, meta))
    }
}
