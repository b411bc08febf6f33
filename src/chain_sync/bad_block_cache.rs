// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;

use cid::Cid;
use hashlink::LruCache;
use nonzero_ext::nonzero;
use parking_lot::Mutex;

/// Thread-safe cache for tracking bad blocks.
/// This cache is checked before validating a block, to ensure no duplicate
/// work.
#[derive(Debug)]
pub struct BadBlockCache {
    cache: Mutex<LruCache<Cid, ()>>,
}

impl Default for BadBlockCache {
    fn default() -> Self {
        Self::new(nonzero!(1usize << 15))
    }
}

impl BadBlockCache {
    pub fn new(cap: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(cap.get())),
        }
    }

    pub fn push(&self, c: Cid) {
        self.cache.lock().insert(c, ());
        tracing::warn!("Marked bad block: {c}");
    }

    /// Returns `Some` if the block CID is in bad block cache.
    /// This function does not update the head position of the `Cid` key.
    pub fn peek(&self, c: &Cid) -> Option<()> {
        self.cache.lock().contains_key(c).then_some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cid::cbor_bytes_cid;

    #[test]
    fn oldest_entry_is_evicted() {
        let cache = BadBlockCache::new(nonzero!(2usize));
        let [a, b, c] = [b"a", b"b", b"c"].map(|s| cbor_bytes_cid(s));
        cache.push(a);
        cache.push(b);
        cache.push(c);
        assert!(cache.peek(&a).is_none());
        assert!(cache.peek(&b).is_some());
        assert!(cache.peek(&c).is_some());
    }
}
