// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{cmp::Ordering, fmt, sync::Arc};

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Block, BlockHeader, ChainEpoch, Ticket};
use crate::message::SignedMessage;

/// A set of CIDs forming a unique key for a tipset. The CIDs are kept sorted
/// by their byte representation, so equal sets give equal keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsetKey(Vec<Cid>);

impl TipsetKey {
    pub fn new(cids: impl IntoIterator<Item = Cid>) -> Self {
        let mut cids = cids.into_iter().collect_vec();
        cids.sort_by_cached_key(Cid::to_bytes);
        cids.dedup();
        Self(cids)
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cid> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.0.contains(cid)
    }

    pub fn into_cids(self) -> Vec<Cid> {
        self.0
    }
}

impl Ord for TipsetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .map(Cid::to_bytes)
            .cmp(other.0.iter().map(Cid::to_bytes))
    }
}

impl PartialOrd for TipsetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

impl FromIterator<Cid> for TipsetKey {
    fn from_iter<T: IntoIterator<Item = Cid>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateTipsetError {
    #[error("tipsets must not be empty")]
    Empty,
    #[error(
        "parent epoch is inconsistent. Expected: {expected}, actual: {actual} in block {cid}"
    )]
    BadEpoch {
        expected: ChainEpoch,
        actual: ChainEpoch,
        cid: Cid,
    },
    #[error("parent keys are inconsistent in block {0}")]
    BadParents(Cid),
    #[error("duplicate block {0}")]
    Duplicate(Cid),
}

fn verify_headers<'a>(
    headers: impl IntoIterator<Item = &'a BlockHeader>,
) -> Result<(), CreateTipsetError> {
    let mut headers = headers.into_iter();
    let first = headers.next().ok_or(CreateTipsetError::Empty)?;
    let mut seen = vec![*first.cid()];
    for header in headers {
        if header.epoch != first.epoch {
            return Err(CreateTipsetError::BadEpoch {
                expected: first.epoch,
                actual: header.epoch,
                cid: *header.cid(),
            });
        }
        if header.parents != first.parents {
            return Err(CreateTipsetError::BadParents(*header.cid()));
        }
        if seen.contains(header.cid()) {
            return Err(CreateTipsetError::Duplicate(*header.cid()));
        }
        seen.push(*header.cid());
    }
    Ok(())
}

/// An immutable set of blocks at the same epoch with the same parent set.
/// Blocks are ordered by CID bytes, matching the [`TipsetKey`] order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tipset {
    headers: Vec<BlockHeader>,
    key: TipsetKey,
}

impl From<BlockHeader> for Tipset {
    fn from(header: BlockHeader) -> Self {
        let key = TipsetKey(vec![*header.cid()]);
        Self {
            headers: vec![header],
            key,
        }
    }
}

impl Tipset {
    /// Builds a new tipset from a collection of blocks.
    /// A valid tipset contains a non-empty collection of distinct blocks
    /// that have the same epoch and the same parent set.
    pub fn new(headers: impl IntoIterator<Item = BlockHeader>) -> Result<Self, CreateTipsetError> {
        let mut headers = headers.into_iter().collect_vec();
        verify_headers(&headers)?;
        headers.sort_by_cached_key(|h| h.cid().to_bytes());
        let key = TipsetKey(headers.iter().map(|h| *h.cid()).collect());
        Ok(Self { headers, key })
    }

    /// Loads a tipset from the block store, `None` when any header is missing.
    pub fn load(store: &impl Blockstore, key: &TipsetKey) -> anyhow::Result<Option<Tipset>> {
        let mut headers = Vec::with_capacity(key.len());
        for cid in key.iter() {
            match BlockHeader::load(store, *cid)? {
                Some(header) => headers.push(header),
                None => return Ok(None),
            }
        }
        Ok(Some(Tipset::new(headers)?))
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.min_ticket_block().epoch
    }

    pub fn block_headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    pub fn into_block_headers(self) -> Vec<BlockHeader> {
        self.headers
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.min_ticket_block().parents
    }

    /// State root every block of the tipset commits to: the post-state of
    /// the parent tipset.
    pub fn parent_state(&self) -> &Cid {
        &self.min_ticket_block().state_root
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// The block with the best ticket.
    pub fn min_ticket_block(&self) -> &BlockHeader {
        self.headers
            .iter()
            .min_by_key(|h| h.ticket.as_ref().map(|t| std::cmp::Reverse(t.quality())))
            .unwrap_or(&self.headers[0])
    }

    pub fn min_ticket(&self) -> Option<&Ticket> {
        self.min_ticket_block().ticket.as_ref()
    }

    /// Returns `true` if `self` is a direct child of `other`.
    pub fn is_child_of(&self, other: &Tipset) -> bool {
        self.parents() == other.key() && self.epoch() == other.epoch() + 1
    }

    pub fn genesis(&self) -> bool {
        self.parents().is_empty()
    }
}

/// A tipset with all of its block messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullTipset {
    blocks: Vec<Block>,
    key: TipsetKey,
}

impl From<Block> for FullTipset {
    fn from(block: Block) -> Self {
        let key = TipsetKey(vec![*block.cid()]);
        Self {
            blocks: vec![block],
            key,
        }
    }
}

impl FullTipset {
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> Result<Self, CreateTipsetError> {
        let mut blocks = blocks.into_iter().collect_vec();
        verify_headers(blocks.iter().map(Block::header))?;
        blocks.sort_by_cached_key(|b| b.cid().to_bytes());
        let key = TipsetKey(blocks.iter().map(|b| *b.cid()).collect());
        Ok(Self { blocks, key })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.blocks[0].header.parents
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.blocks[0].header.epoch
    }

    /// Returns the state root every block of this tipset commits to.
    pub fn parent_state(&self) -> &Cid {
        &self.blocks[0].header.state_root
    }

    /// Messages of the tipset in execution order: blocks in tipset order,
    /// messages in block order, each message applied once. A later copy of
    /// a message or a second message with an already used sender sequence
    /// is skipped.
    pub fn messages(&self) -> Vec<SignedMessage> {
        let mut seen_cids = ahash::HashSet::default();
        let mut seen_sequences = ahash::HashSet::default();
        let mut out = Vec::new();
        for msg in self.blocks.iter().flat_map(|b| b.messages.iter()) {
            let cid = msg.cid();
            if !seen_cids.insert(cid) {
                continue;
            }
            if !seen_sequences.insert((msg.message.from, msg.message.sequence)) {
                continue;
            }
            out.push(msg.clone());
        }
        out
    }

    /// Returns a [`Tipset`] of the block headers.
    pub fn into_tipset(self) -> Tipset {
        Tipset {
            headers: self.blocks.into_iter().map(|b| b.header).collect(),
            key: self.key,
        }
    }

    pub fn to_tipset(&self) -> Tipset {
        self.clone().into_tipset()
    }

    /// Loads the full tipset from the block store, `None` when any block is
    /// missing.
    pub fn load(store: &impl Blockstore, key: &TipsetKey) -> anyhow::Result<Option<FullTipset>> {
        let mut blocks = Vec::with_capacity(key.len());
        for cid in key.iter() {
            match Block::load(store, *cid)? {
                Some(block) => blocks.push(block),
                None => return Ok(None),
            }
        }
        Ok(Some(FullTipset::new(blocks)?))
    }

    pub fn persist(&self, store: &impl Blockstore) -> anyhow::Result<()> {
        self.blocks.iter().try_for_each(|b| b.persist(store))
    }
}

impl From<&FullTipset> for Arc<Tipset> {
    fn from(full: &FullTipset) -> Self {
        Arc::new(full.to_tipset())
    }
}
