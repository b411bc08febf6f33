// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::sync::Arc;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::Mutex;
use tracing::debug;

use super::Error;
use crate::blocks::{BlockHeader, ChainEpoch, Tipset};

/// Tracks validated blocks for the purpose of forming tipsets: blocks of one
/// epoch with the same parents arrive separately and are merged here.
pub(in crate::chain) struct TipsetTracker<DB> {
    entries: Mutex<BTreeMap<ChainEpoch, Vec<Cid>>>,
    db: Arc<DB>,
    lookback: ChainEpoch,
}

impl<DB: Blockstore> TipsetTracker<DB> {
    pub fn new(db: Arc<DB>, lookback: ChainEpoch) -> Self {
        Self {
            entries: Default::default(),
            db,
            lookback,
        }
    }

    /// Adds a validated block header to the tracker.
    pub fn add(&self, header: &BlockHeader) {
        let mut map_lock = self.entries.lock();
        let cids = map_lock.entry(header.epoch).or_default();
        if cids.contains(header.cid()) {
            debug!("tried to add block to tipset tracker that was already there");
            return;
        }
        cids.push(*header.cid());
        if let Some(&newest) = map_lock.keys().next_back() {
            let kept = map_lock.split_off(&(newest - self.lookback));
            *map_lock = kept;
        }
    }

    /// Returns `ts` extended with every tracked sibling block: same epoch and
    /// same parents.
    pub fn expand(&self, ts: &Tipset) -> Result<Tipset, Error> {
        let tracked = self
            .entries
            .lock()
            .get(&ts.epoch())
            .cloned()
            .unwrap_or_default();
        let mut headers = ts.block_headers().to_vec();
        for cid in tracked {
            if ts.key().contains(&cid) {
                continue;
            }
            let Some(header) = BlockHeader::load(&self.db, cid)? else {
                continue;
            };
            if header.parents != *ts.parents() {
                continue;
            }
            headers.push(header);
        }
        Ok(Tipset::new(headers)?)
    }
}
