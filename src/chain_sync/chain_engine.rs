// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use ahash::HashMap;
use anyhow::Context as _;
use fvm_ipld_blockstore::Blockstore;
use nonzero_ext::nonzero;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tokio::sync::broadcast::Receiver as Subscriber;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BadBlockCache, SyncState,
    consensus::ProofVerifier,
    metrics,
    network::{BlockFetcher, PeerId},
    tipset_syncer::{SyncError, TipsetSyncer},
    validation::{BlockValidationError, Validator},
};
use crate::blocks::{Block, ChainEpoch, FullTipset, Tipset, TipsetKey};
use crate::chain::{ChainStore, HeadChange, Weight};
use crate::db::SettingsStore;
use crate::interpreter::StateTransition;
use crate::utils::cid::cbor_bytes_cid;

/// Number of finished sync requests kept for [`ChainEngine::sync_states`].
const RECENT_SYNCS: usize = 32;

/// Structure that defines syncing configuration options
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, SmartDefault)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of missing ancestors fetched for one request
    #[default(900)]
    pub max_depth: usize,
    /// Timeout of a block fetch, in seconds, retries included
    #[default(30)]
    pub fetch_timeout: u64,
    #[default(3)]
    pub fetch_retries: usize,
    #[default(500)]
    pub fetch_retry_delay_ms: u64,
    /// Cancel in-flight requests whose target another request has indexed
    #[default(true)]
    pub abandon_superseded: bool,
    /// Head change events buffered per subscriber
    #[default(200)]
    pub head_change_capacity: usize,
    /// Number of epochs the tipset tracker remembers
    #[default(900)]
    pub tipset_tracker_lookback: ChainEpoch,
    #[default(nonzero!(8192usize))]
    pub validation_cache_size: NonZeroUsize,
    #[default(nonzero!(1usize << 15))]
    pub bad_block_cache_size: NonZeroUsize,
}

/// Result of a sync request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The target is already indexed.
    AlreadyKnown,
    /// A request for the same target is running.
    InFlight,
    /// The target was indexed. Carries the head change, if the head moved.
    Committed(Option<Arc<HeadChange>>),
}

struct InFlightSync {
    epoch: ChainEpoch,
    cancel: CancellationToken,
    state: Arc<RwLock<SyncState>>,
}

/// Removes a request from the in-flight registry, also when the sync future
/// is dropped.
struct InFlightGuard<'a> {
    registry: &'a Mutex<HashMap<TipsetKey, InFlightSync>>,
    key: TipsetKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Chain management and consensus engine: accepts blocks, syncs their
/// ancestry, keeps the heaviest chain as head and publishes head changes.
pub struct ChainEngine<DB> {
    chain_store: Arc<ChainStore<DB>>,
    syncer: TipsetSyncer<DB>,
    in_flight: Mutex<HashMap<TipsetKey, InFlightSync>>,
    recent: RwLock<VecDeque<SyncState>>,
}

impl<DB> ChainEngine<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    pub fn new(
        db: Arc<DB>,
        settings: Arc<dyn SettingsStore + Sync + Send>,
        genesis: &Block,
        state_transition: Arc<dyn StateTransition>,
        verifier: Arc<dyn ProofVerifier>,
        fetcher: Arc<dyn BlockFetcher>,
        config: SyncConfig,
    ) -> anyhow::Result<Self> {
        let chain_store = Arc::new(ChainStore::new(
            db,
            settings,
            genesis,
            config.head_change_capacity,
            config.tipset_tracker_lookback,
        )?);
        let syncer = TipsetSyncer {
            chain_store: chain_store.clone(),
            state_transition,
            validator: Arc::new(Validator::new(verifier, config.validation_cache_size)),
            fetcher,
            bad_block_cache: Arc::new(BadBlockCache::new(config.bad_block_cache_size)),
            config,
        };
        Ok(Self {
            chain_store,
            syncer,
            in_flight: Default::default(),
            recent: Default::default(),
        })
    }

    pub fn chain_store(&self) -> &Arc<ChainStore<DB>> {
        &self.chain_store
    }

    pub fn state_transition(&self) -> &Arc<dyn StateTransition> {
        &self.syncer.state_transition
    }

    pub fn head(&self) -> Arc<Tipset> {
        self.chain_store.heaviest_tipset()
    }

    pub fn weight(&self, key: &TipsetKey) -> Option<Weight> {
        self.chain_store.weight(key)
    }

    pub fn tipset(&self, key: &TipsetKey) -> Option<Arc<Tipset>> {
        self.chain_store.tipset(key)
    }

    pub fn subscribe_head_change(&self) -> Subscriber<Arc<HeadChange>> {
        self.chain_store.subscribe()
    }

    /// States of the running requests followed by the most recently
    /// finished ones.
    pub fn sync_states(&self) -> Vec<SyncState> {
        let mut states: Vec<SyncState> = self
            .in_flight
            .lock()
            .values()
            .map(|sync| sync.state.read().clone())
            .collect();
        states.extend(self.recent.read().iter().rev().cloned());
        states
    }

    /// Decodes a gossiped block and syncs it as a single-block tipset.
    pub async fn submit_block(
        &self,
        raw: &[u8],
        source: Option<PeerId>,
    ) -> Result<SyncOutcome, SyncError> {
        let block: Block = fvm_ipld_encoding::from_slice(raw).map_err(|e| SyncError::Rejected {
            cid: cbor_bytes_cid(raw),
            reason: BlockValidationError::Malformed(format!("undecodable block: {e}")),
        })?;
        self.submit_full_block(block, source).await
    }

    pub async fn submit_full_block(
        &self,
        block: Block,
        source: Option<PeerId>,
    ) -> Result<SyncOutcome, SyncError> {
        self.sync(FullTipset::from(block), source).await
    }

    /// Syncs `target` and its missing ancestry. The whole request is
    /// committed at once or not at all.
    pub async fn sync(
        &self,
        target: FullTipset,
        source: Option<PeerId>,
    ) -> Result<SyncOutcome, SyncError> {
        let key = target.key().clone();
        if self.chain_store.contains(&key) {
            return Ok(SyncOutcome::AlreadyKnown);
        }
        let (cancel, state) = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&key) {
                debug!("sync of {key} already in flight");
                return Ok(SyncOutcome::InFlight);
            }
            let sync = InFlightSync {
                epoch: target.epoch(),
                cancel: CancellationToken::new(),
                state: Default::default(),
            };
            let handles = (sync.cancel.clone(), sync.state.clone());
            in_flight.insert(key.clone(), sync);
            handles
        };
        let guard = InFlightGuard {
            registry: &self.in_flight,
            key,
        };
        metrics::SYNC_REQUEST_TOTAL.inc();

        let result = self.syncer.sync(target, source, &state, &cancel).await;
        drop(guard);
        match &result {
            Ok(_) => self.abandon_superseded(),
            Err(e) => {
                debug!("sync failed: {e}");
                state.write().error(e.to_string(), e.stage());
            }
        }
        self.record(state.read().clone());
        result.map(SyncOutcome::Committed)
    }

    /// Cancels the in-flight requests whose target is indexed by now. A
    /// target at a lower epoch than the head may still be heavier, so
    /// unindexed targets always run to completion and fork choice decides.
    fn abandon_superseded(&self) {
        if !self.syncer.config.abandon_superseded {
            return;
        }
        for (key, sync) in self.in_flight.lock().iter() {
            if !sync.cancel.is_cancelled() && self.chain_store.contains(key) {
                info!("abandoning sync of {key} (EPOCH = {}), already indexed", sync.epoch);
                sync.cancel.cancel();
            }
        }
    }

    fn record(&self, state: SyncState) {
        let mut recent = self.recent.write();
        if recent.len() == RECENT_SYNCS {
            recent.pop_front();
        }
        recent.push_back(state);
    }

    /// Replays the persisted head's ancestry after a restart. The blocks are
    /// validated and applied again from genesis. On failure the engine stays
    /// at genesis.
    pub async fn restore(&self) -> anyhow::Result<Arc<Tipset>> {
        let Some(key) = self.chain_store.persisted_head()? else {
            return Ok(self.head());
        };
        if self.chain_store.contains(&key) {
            return Ok(self.head());
        }
        let target = self
            .chain_store
            .load_full_tipset(&key)?
            .with_context(|| format!("persisted head {key} is missing from the database"))?;
        info!("Restoring chain head {key} (EPOCH = {})", target.epoch());
        let replay = TipsetSyncer {
            chain_store: self.chain_store.clone(),
            state_transition: self.syncer.state_transition.clone(),
            validator: self.syncer.validator.clone(),
            fetcher: Arc::new(super::OfflineFetcher),
            bad_block_cache: self.syncer.bad_block_cache.clone(),
            config: SyncConfig {
                max_depth: usize::MAX,
                ..self.syncer.config.clone()
            },
        };
        let state = RwLock::new(SyncState::default());
        if let Err(e) = replay
            .sync(target, None, &state, &CancellationToken::new())
            .await
        {
            warn!("Failed to restore chain head {key}: {e}");
            return Err(e.into());
        }
        Ok(self.head())
    }
}
