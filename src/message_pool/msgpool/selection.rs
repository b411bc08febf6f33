// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Contains the implementation of message selection for block production.
// Each sender contributes the contiguous run of messages that executes on top
// of the committed state; runs are interleaved greedily by priority.

use std::{cmp::Ordering, collections::BinaryHeap};

use chrono::{DateTime, Utc};

use super::{
    msg_pool::{MessagePool, PoolEntry},
    provider::Provider,
};
use crate::blocks::BLOCK_MESSAGE_LIMIT;
use crate::crypto::Address;
use crate::message::{Message as _, SignedMessage, TokenAmount};

impl<T> MessagePool<T>
where
    T: Provider,
{
    /// Selects at most `max_count` messages whose serialized sizes sum to at
    /// most `max_size`, for a block on top of the current tipset. No sender's
    /// selection skips a sequence.
    pub fn select_for_block(&self, max_count: usize, max_size: usize) -> Vec<SignedMessage> {
        let runs: Vec<Vec<PoolEntry>> = {
            let state = self.state.read();
            state
                .pending
                .values()
                .map(|set| set.executable().cloned().collect::<Vec<_>>())
                .filter(|run| !run.is_empty())
                .collect()
        };
        select_from_runs(runs, max_count.min(BLOCK_MESSAGE_LIMIT), max_size)
    }
}

/// Next message of one sender's run, ranked by priority, then earliest
/// receipt, then arrival, then sender address.
struct Candidate {
    run: usize,
    index: usize,
    priority: TokenAmount,
    received_at: DateTime<Utc>,
    arrival: u64,
    sender: Address,
}

impl Candidate {
    fn new(run: usize, index: usize, entry: &PoolEntry) -> Self {
        Self {
            run,
            index,
            priority: entry.message.gas_premium(),
            received_at: entry.received_at,
            arrival: entry.arrival,
            sender: entry.message.from(),
        }
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.received_at.cmp(&self.received_at))
            .then_with(|| other.arrival.cmp(&self.arrival))
            .then_with(|| other.sender.cmp(&self.sender))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

fn select_from_runs(
    runs: Vec<Vec<PoolEntry>>,
    max_count: usize,
    max_size: usize,
) -> Vec<SignedMessage> {
    let mut heap: BinaryHeap<Candidate> = runs
        .iter()
        .enumerate()
        .filter_map(|(run, entries)| entries.first().map(|entry| Candidate::new(run, 0, entry)))
        .collect();
    let mut selected = Vec::new();
    let mut size = 0usize;
    while selected.len() < max_count {
        let Some(best) = heap.pop() else {
            break;
        };
        let entry = &runs[best.run][best.index];
        let len = entry.message.chain_length();
        // the sender stops contributing once its next message does not fit
        if size.saturating_add(len) > max_size {
            continue;
        }
        size += len;
        selected.push(entry.message.clone());
        if let Some(next) = runs[best.run].get(best.index + 1) {
            heap.push(Candidate::new(best.run, best.index + 1, next));
        }
    }
    selected
}

#[cfg(test)]
mod test_selection {
    use std::sync::Arc;

    use ahash::HashMap;
    use tokio::task::JoinSet;

    use super::*;
    use crate::chain_sync::MessageValidationError;
    use crate::message::Message as _;
    use crate::message_pool::{Error, MpoolConfig, msgpool::msg_pool::tests::harness};
    use crate::test_utils::{KEYS, signed_transfer};

    /// Every sender's messages must be a contiguous run from sequence 0,
    /// nothing is committed in these tests.
    fn assert_gap_free(msgs: &[SignedMessage]) {
        let mut next: HashMap<Address, u64> = HashMap::default();
        for msg in msgs {
            let expected = next.entry(msg.from()).or_default();
            assert_eq!(msg.sequence(), *expected, "gap for sender {}", msg.from());
            *expected += 1;
        }
    }

    #[tokio::test]
    async fn selection_interleaves_senders_without_gaps() {
        let h = harness(Default::default());
        let a0 = signed_transfer(&KEYS[0], 0, 1);
        let a1 = signed_transfer(&KEYS[0], 1, 100);
        let b0 = signed_transfer(&KEYS[1], 0, 50);
        for msg in [&a0, &a1, &b0] {
            h.pool.add(msg.clone()).unwrap();
        }
        // `a1` pays the most but cannot precede `a0`.
        assert_eq!(h.pool.select_for_block(10, usize::MAX), vec![b0, a0, a1]);
    }

    #[tokio::test]
    async fn equal_priority_prefers_earliest_arrival() {
        let h = harness(Default::default());
        let first = signed_transfer(&KEYS[3], 0, 5);
        let second = signed_transfer(&KEYS[2], 0, 5);
        h.pool.add(first.clone()).unwrap();
        h.pool.add(second.clone()).unwrap();
        assert_eq!(h.pool.select_for_block(10, usize::MAX), vec![first, second]);
    }

    #[tokio::test]
    async fn selection_respects_count_and_size() {
        let h = harness(Default::default());
        let a0 = signed_transfer(&KEYS[0], 0, 9);
        let a1 = signed_transfer(&KEYS[0], 1, 9);
        let b0 = signed_transfer(&KEYS[1], 0, 3);
        for msg in [&a0, &a1, &b0] {
            h.pool.add(msg.clone()).unwrap();
        }
        assert_eq!(h.pool.select_for_block(2, usize::MAX), vec![a0.clone(), a1.clone()]);
        assert_eq!(h.pool.select_for_block(0, usize::MAX), vec![]);

        let budget = a0.chain_length() + b0.chain_length() + a1.chain_length() - 1;
        let selected = h.pool.select_for_block(10, budget);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().map(|m| m.chain_length()).sum::<usize>() <= budget);
        assert_eq!(selected[0], a0);
    }

    #[tokio::test]
    async fn entries_past_a_gap_are_not_selected() {
        let h = harness(Default::default());
        let msgs: Vec<_> = (0..3).map(|s| signed_transfer(&KEYS[0], s, 1)).collect();
        for msg in &msgs {
            h.pool.add(msg.clone()).unwrap();
        }
        h.pool.state.write().remove(&KEYS[0].address(), 1);
        assert_eq!(h.pool.select_for_block(10, usize::MAX), vec![msgs[0].clone()]);
        assert_eq!(h.pool.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_evictions_and_selection_stay_gap_free() {
        const SIZE_LIMIT: usize = 8;
        let h = harness(MpoolConfig {
            size_limit: SIZE_LIMIT,
            ..Default::default()
        });
        let pool = Arc::new(h.pool);

        let mut tasks = JoinSet::new();
        for (i, key) in KEYS.iter().take(4).enumerate() {
            let pool = pool.clone();
            tasks.spawn(async move {
                for sequence in 0..6 {
                    let premium = (i as u64 + 1) * 10 + sequence;
                    match pool.add(signed_transfer(key, sequence, premium)) {
                        // a full pool or an evicted tail ends this sender's run
                        Ok(_)
                        | Err(Error::PoolFull)
                        | Err(Error::Invalid(MessageValidationError::NonceGap { .. })) => {}
                        Err(e) => panic!("unexpected add error: {e}"),
                    }
                    tokio::task::yield_now().await;
                }
            });
        }
        for _ in 0..2 {
            let pool = pool.clone();
            tasks.spawn(async move {
                for _ in 0..50 {
                    let selected = pool.select_for_block(usize::MAX, usize::MAX);
                    assert!(selected.len() <= SIZE_LIMIT);
                    assert_gap_free(&selected);
                    tokio::task::yield_now().await;
                }
            });
        }
        while let Some(ret) = tasks.join_next().await {
            ret.unwrap();
        }

        assert!(pool.len() <= SIZE_LIMIT);
        let (pending, _) = pool.pending();
        assert_eq!(pending.len(), pool.len());
        assert_gap_free(&pending);
        let selected = pool.select_for_block(usize::MAX, usize::MAX);
        assert_eq!(selected.len(), pending.len());
        assert_gap_free(&selected);
    }
}
