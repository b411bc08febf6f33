// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{Arc, LazyLock};

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use itertools::Itertools as _;
use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::{counter::Counter, histogram::Histogram};
use tokio::sync::broadcast::{self, Receiver as Subscriber, Sender as Publisher};
use tracing::{debug, info};

use super::{
    Error,
    index::{TipsetIndex, TipsetMeta},
    tipset_tracker::TipsetTracker,
};
use crate::blocks::{Block, BlockHeader, ChainEpoch, FullTipset, Tipset, TipsetKey};
use crate::chain::{Weight, fork_choice};
use crate::db::{SettingsStore, SettingsStoreExt as _, setting_keys::HEAD_KEY};
use crate::interpreter::Receipt;
use crate::utils::db::CborStoreExt as _;

// A cap on the size of the future_sink
pub const DEFAULT_HEAD_CHANGE_CAP: usize = 200;

static HEAD_CHANGE_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    crate::metrics::default_registry().register(
        "head_change_total",
        "Total number of head changes",
        metric.clone(),
    );
    metric
});
static REORG_DEPTH: LazyLock<Histogram> = LazyLock::new(|| {
    let metric = Histogram::new([0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 64.0, 256.0]);
    crate::metrics::default_registry().register(
        "reorg_depth",
        "Number of tipsets dropped by a head change",
        metric.clone(),
    );
    metric
});

/// Head change event, published once per committed batch that moves the
/// head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadChange {
    pub old_head: Arc<Tipset>,
    pub new_head: Arc<Tipset>,
    /// Tipsets no longer on the canonical chain, newest first.
    pub dropped: Vec<Arc<Tipset>>,
    /// Tipsets that joined the canonical chain, oldest first.
    pub adopted: Vec<Arc<Tipset>>,
}

/// Stores chain data such as the heaviest tipset and the index of every
/// validated tipset. This structure is thread-safe: reads go through
/// read locks, and every mutation of the index or the head is serialised by
/// a single apply lock.
pub struct ChainStore<DB> {
    /// Publisher for head change events
    publisher: Publisher<Arc<HeadChange>>,

    /// key-value `datastore`.
    pub db: Arc<DB>,

    /// Settings store, holding the persisted head.
    settings: Arc<dyn SettingsStore + Sync + Send>,

    index: RwLock<TipsetIndex>,

    heaviest: RwLock<Arc<Tipset>>,

    /// Serialises index and head mutation.
    apply_lock: Mutex<()>,

    /// Tracks blocks for the purpose of forming tipsets.
    tipset_tracker: TipsetTracker<DB>,

    genesis: Arc<Tipset>,
}

impl<DB> ChainStore<DB>
where
    DB: Blockstore + Send + Sync,
{
    pub fn new(
        db: Arc<DB>,
        settings: Arc<dyn SettingsStore + Sync + Send>,
        genesis: &Block,
        head_change_capacity: usize,
        tracker_lookback: ChainEpoch,
    ) -> anyhow::Result<Self> {
        let (publisher, _) = broadcast::channel(head_change_capacity.max(1));
        genesis.persist(&db)?;
        let genesis_ts = Arc::new(Tipset::from(genesis.header.clone()));
        let receipt_root = db.put_cbor_default(&Vec::<Receipt>::new())?;
        let mut index = TipsetIndex::new();
        index.insert(
            genesis_ts.clone(),
            TipsetMeta {
                weight: Weight::from(0),
                parent: None,
                state_root: genesis.header.state_root,
                receipt_root,
            },
        )?;

        if settings.read_obj::<Vec<String>>(HEAD_KEY)?.is_none() {
            settings.write_obj(HEAD_KEY, &head_record(genesis_ts.key()))?;
        }

        Ok(Self {
            publisher,
            tipset_tracker: TipsetTracker::new(Arc::clone(&db), tracker_lookback),
            db,
            settings,
            index: RwLock::new(index),
            heaviest: RwLock::new(genesis_ts.clone()),
            apply_lock: Mutex::new(()),
            genesis: genesis_ts,
        })
    }

    pub fn blockstore(&self) -> &DB {
        &self.db
    }

    /// Returns the currently tracked heaviest tipset.
    pub fn heaviest_tipset(&self) -> Arc<Tipset> {
        self.heaviest.read().clone()
    }

    pub fn genesis(&self) -> &Arc<Tipset> {
        &self.genesis
    }

    /// Subscribes to head change events.
    pub fn subscribe(&self) -> Subscriber<Arc<HeadChange>> {
        self.publisher.subscribe()
    }

    pub fn weight(&self, key: &TipsetKey) -> Option<Weight> {
        self.index.read().get(key).map(|meta| meta.weight.clone())
    }

    pub fn tipset_meta(&self, key: &TipsetKey) -> Option<TipsetMeta> {
        self.index.read().get(key).cloned()
    }

    pub fn tipset(&self, key: &TipsetKey) -> Option<Arc<Tipset>> {
        self.index.read().tipset(key).cloned()
    }

    pub fn contains(&self, key: &TipsetKey) -> bool {
        self.index.read().contains(key)
    }

    /// Gives read access to the tipset index.
    pub fn with_index<R>(&self, f: impl FnOnce(&TipsetIndex) -> R) -> R {
        f(&self.index.read())
    }

    /// Up to `limit` tipsets from `from` towards genesis.
    pub fn ancestors(&self, from: &TipsetKey, limit: usize) -> Vec<Arc<Tipset>> {
        self.index
            .read()
            .chain(from)
            .take(limit)
            .cloned()
            .collect_vec()
    }

    /// Head key written by the last head change, if any.
    pub fn persisted_head(&self) -> anyhow::Result<Option<TipsetKey>> {
        let Some(record) = self.settings.read_obj::<Vec<String>>(HEAD_KEY)? else {
            return Ok(None);
        };
        let cids = record
            .iter()
            .map(|s| Cid::try_from(s.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(TipsetKey::new(cids)))
    }

    /// Adds a validated [`BlockHeader`] to the tipset tracker.
    pub fn add_to_tipset_tracker(&self, header: &BlockHeader) {
        self.tipset_tracker.add(header);
    }

    /// Expands `ts` with every tracked sibling block.
    pub fn expand_tipset(&self, ts: &Tipset) -> Result<Tipset, Error> {
        self.tipset_tracker.expand(ts)
    }

    /// Loads a full tipset from the block store.
    pub fn load_full_tipset(&self, key: &TipsetKey) -> anyhow::Result<Option<FullTipset>> {
        FullTipset::load(&self.db, key)
    }

    /// Indexes a batch of validated tipsets, parents first, and re-runs fork
    /// choice. Returns the head change when the head moved.
    ///
    /// The whole batch is inserted under the apply lock and the head moves
    /// once, so subscribers see a single coalesced event.
    pub fn apply_batch(
        &self,
        batch: Vec<(Arc<Tipset>, TipsetMeta)>,
    ) -> Result<Option<Arc<HeadChange>>, Error> {
        let _guard = self.apply_lock.lock();
        let old_head = self.heaviest_tipset();
        let (new_head, delta) = {
            let mut index = self.index.write();
            for (ts, meta) in batch {
                if index.insert(ts.clone(), meta)? {
                    debug!("indexed tipset {} (EPOCH = {})", ts.key(), ts.epoch());
                }
            }
            let best = fork_choice::select(
                std::iter::once(old_head.key())
                    .chain(index.leaves())
                    .filter_map(|key| index.get(key).map(|meta| (key, &meta.weight))),
            )
            .ok_or_else(|| Error::UndefinedKey(old_head.key().clone()))?;
            if &best == old_head.key() {
                return Ok(None);
            }
            let delta = index.reorg_delta(old_head.key(), &best)?;
            let new_head = index
                .tipset(&best)
                .cloned()
                .ok_or(Error::UndefinedKey(best))?;
            (new_head, delta)
        };

        let change = Arc::new(HeadChange {
            old_head,
            new_head,
            dropped: delta.dropped,
            adopted: delta.adopted,
        });
        self.set_heaviest_tipset(change.clone())?;
        Ok(Some(change))
    }

    /// Sets heaviest tipset within `ChainStore`, stores its tipset key in the
    /// settings store under the [`HEAD_KEY`] key and publishes the change.
    fn set_heaviest_tipset(&self, change: Arc<HeadChange>) -> Result<(), Error> {
        self.settings
            .write_obj(HEAD_KEY, &head_record(change.new_head.key()))?;
        *self.heaviest.write() = change.new_head.clone();
        HEAD_CHANGE_TOTAL.inc();
        REORG_DEPTH.observe(change.dropped.len() as f64);
        if change.dropped.is_empty() {
            info!(
                "New heaviest tipset! {} (EPOCH = {})",
                change.new_head.key(),
                change.new_head.epoch()
            );
        } else {
            info!(
                "Chain reorg: new heaviest tipset {} (EPOCH = {}), dropped {} and adopted {} tipsets",
                change.new_head.key(),
                change.new_head.epoch(),
                change.dropped.len(),
                change.adopted.len()
            );
        }
        if self.publisher.send(change).is_err() {
            debug!("did not publish head change, no active receivers");
        }
        Ok(())
    }
}

fn head_record(key: &TipsetKey) -> Vec<String> {
    key.iter().map(Cid::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::weight_delta;
    use crate::db::MemoryDB;
    use crate::test_utils::{KEYS, TestChain};
    use pretty_assertions::assert_eq;

    fn store(chain: &TestChain) -> ChainStore<MemoryDB> {
        let db = Arc::new(MemoryDB::default());
        ChainStore::new(
            db.clone(),
            db,
            &chain.genesis_block(),
            DEFAULT_HEAD_CHANGE_CAP,
            10,
        )
        .unwrap()
    }

    fn entry(
        cs: &ChainStore<MemoryDB>,
        full: &FullTipset,
        parent_weight: &Weight,
    ) -> (Arc<Tipset>, TipsetMeta) {
        let ts = Arc::new(full.to_tipset());
        let meta = TipsetMeta {
            weight: parent_weight + weight_delta(&ts),
            parent: Some(ts.parents().clone()),
            state_root: *cs.genesis().parent_state(),
            receipt_root: Cid::default(),
        };
        (ts, meta)
    }

    #[test]
    fn new_store_starts_at_genesis() {
        let chain = TestChain::new();
        let cs = store(&chain);
        assert_eq!(cs.heaviest_tipset().key(), chain.genesis_tipset().key());
        assert_eq!(cs.weight(cs.genesis().key()), Some(Weight::from(0)));
        assert_eq!(
            cs.persisted_head().unwrap().as_ref(),
            Some(chain.genesis_tipset().key())
        );
    }

    #[test]
    fn batch_emits_one_event() {
        let chain = TestChain::new();
        let cs = store(&chain);
        let mut rx = cs.subscribe();
        let tipsets = chain.extend(&chain.genesis_tipset(), 3, &KEYS[0]);
        let mut weight = Weight::from(0);
        let mut batch = vec![];
        for full in &tipsets {
            let (ts, meta) = entry(&cs, full, &weight);
            weight = meta.weight.clone();
            batch.push((ts, meta));
        }
        let change = cs.apply_batch(batch).unwrap().unwrap();
        assert_eq!(change.adopted.len(), 3);
        assert!(change.dropped.is_empty());
        assert_eq!(change.new_head.key(), tipsets[2].key());
        assert_eq!(rx.try_recv().unwrap(), change);
        assert!(rx.try_recv().is_err());
        assert_eq!(cs.persisted_head().unwrap().as_ref(), Some(tipsets[2].key()));
    }

    #[test]
    fn lighter_fork_does_not_move_head() {
        let chain = TestChain::new();
        let cs = store(&chain);
        let genesis = chain.genesis_tipset();
        let main = chain.extend(&genesis, 2, &KEYS[0]);
        let (a1, m1) = entry(&cs, &main[0], &Weight::from(0));
        let (a2, m2) = entry(&cs, &main[1], &m1.weight);
        cs.apply_batch(vec![(a1, m1), (a2.clone(), m2)]).unwrap();

        let fork = FullTipset::from(chain.block_on(&genesis, &KEYS[1], vec![]));
        let mut rx = cs.subscribe();
        assert!(cs.apply_batch(vec![entry(&cs, &fork, &Weight::from(0))]).unwrap().is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(cs.heaviest_tipset(), a2);
        assert!(cs.contains(fork.key()));
    }

    #[test]
    fn equal_weight_prefers_smaller_key() {
        let chain = TestChain::new();
        let cs = store(&chain);
        let genesis = chain.genesis_tipset();
        let a = FullTipset::from(chain.block_on(&genesis, &KEYS[0], vec![]));
        let b = FullTipset::from(chain.block_on(&genesis, &KEYS[1], vec![]));
        let w = Weight::from(5);
        let meta = || TipsetMeta {
            weight: w.clone(),
            parent: Some(genesis.key().clone()),
            state_root: *cs.genesis().parent_state(),
            receipt_root: Cid::default(),
        };
        cs.apply_batch(vec![(Arc::new(a.to_tipset()), meta())]).unwrap();
        cs.apply_batch(vec![(Arc::new(b.to_tipset()), meta())]).unwrap();
        let expected = std::cmp::min(a.key(), b.key());
        assert_eq!(cs.heaviest_tipset().key(), expected);
    }
}
