// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory index of every validated tipset.
//!
//! The index is an arena keyed by [`TipsetKey`]: parent links, child sets
//! and the leaf set all refer to tipsets by key, never by pointer. It does
//! no validation of its own, it only refuses entries whose parent is
//! unknown, so every indexed tipset has its whole ancestry indexed.

use std::sync::Arc;

use ahash::{HashMap, HashSet};
use cid::Cid;

use super::Error;
use crate::blocks::{Tipset, TipsetKey};
use crate::chain::Weight;

/// Metadata kept for every indexed tipset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TipsetMeta {
    /// Cumulative weight from genesis.
    pub weight: Weight,
    /// `None` only for genesis.
    pub parent: Option<TipsetKey>,
    /// State root after applying the messages of this tipset.
    pub state_root: Cid,
    /// Receipts of the messages of this tipset.
    pub receipt_root: Cid,
}

#[derive(Debug)]
struct Entry {
    tipset: Arc<Tipset>,
    meta: TipsetMeta,
}

/// Tipsets to revert and to apply when moving the head between two indexed
/// tipsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorgDelta {
    /// Newest first, common ancestor excluded.
    pub dropped: Vec<Arc<Tipset>>,
    /// Oldest first, common ancestor excluded.
    pub adopted: Vec<Arc<Tipset>>,
}

#[derive(Debug, Default)]
pub struct TipsetIndex {
    entries: HashMap<TipsetKey, Entry>,
    children: HashMap<TipsetKey, HashSet<TipsetKey>>,
    leaves: HashSet<TipsetKey>,
}

impl TipsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `tipset`. Returns `Ok(false)` when it was already present, in
    /// which case nothing changes.
    pub fn insert(&mut self, tipset: Arc<Tipset>, meta: TipsetMeta) -> Result<bool, Error> {
        let key = tipset.key().clone();
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        if let Some(parent) = &meta.parent {
            if !self.entries.contains_key(parent) {
                return Err(Error::MissingParent {
                    parent: parent.clone(),
                    child: key,
                });
            }
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(key.clone());
            self.leaves.remove(parent);
        }
        self.leaves.insert(key.clone());
        self.entries.insert(key, Entry { tipset, meta });
        Ok(true)
    }

    pub fn get(&self, key: &TipsetKey) -> Option<&TipsetMeta> {
        self.entries.get(key).map(|e| &e.meta)
    }

    pub fn tipset(&self, key: &TipsetKey) -> Option<&Arc<Tipset>> {
        self.entries.get(key).map(|e| &e.tipset)
    }

    pub fn contains(&self, key: &TipsetKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn children_of(&self, key: &TipsetKey) -> HashSet<TipsetKey> {
        self.children.get(key).cloned().unwrap_or_default()
    }

    /// Tipsets without indexed children.
    pub fn leaves(&self) -> impl Iterator<Item = &TipsetKey> + '_ {
        self.leaves.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walks from `from` back to genesis, `from` included.
    pub fn chain<'a>(&'a self, from: &TipsetKey) -> impl Iterator<Item = &'a Arc<Tipset>> + 'a {
        std::iter::successors(self.entries.get(from), move |entry| {
            entry
                .meta
                .parent
                .as_ref()
                .and_then(|p| self.entries.get(p))
        })
        .map(|entry| &entry.tipset)
    }

    /// Computes the tipsets to drop and adopt when switching from `old` to
    /// `new`, walking both back to their common ancestor.
    pub fn reorg_delta(&self, old: &TipsetKey, new: &TipsetKey) -> Result<ReorgDelta, Error> {
        let lookup = |key: &TipsetKey| {
            self.entries
                .get(key)
                .ok_or_else(|| Error::UndefinedKey(key.clone()))
        };
        let mut left = lookup(old)?;
        let mut right = lookup(new)?;
        let mut delta = ReorgDelta::default();
        while left.tipset.key() != right.tipset.key() {
            if left.tipset.epoch() > right.tipset.epoch() {
                delta.dropped.push(left.tipset.clone());
                left = lookup(parent_of(left)?)?;
            } else {
                delta.adopted.push(right.tipset.clone());
                right = lookup(parent_of(right)?)?;
            }
        }
        delta.adopted.reverse();
        Ok(delta)
    }
}

fn parent_of(entry: &Entry) -> Result<&TipsetKey, Error> {
    entry
        .meta
        .parent
        .as_ref()
        .ok_or_else(|| Error::UndefinedKey(entry.tipset.parents().clone()))
}
