// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub(in crate::message_pool) mod msg_pool;
pub(in crate::message_pool) mod provider;
mod selection;

use std::{collections::BTreeMap, sync::Arc};

use ahash::{HashMap, HashMapExt as _};
use parking_lot::RwLock;
use tracing::debug;

use self::{
    msg_pool::{PoolState, add_locked},
    provider::Provider,
};
use crate::blocks::Tipset;
use crate::chain_sync::MessageValidator;
use crate::crypto::Address;
use crate::message::{Message as _, SignedMessage};
use crate::message_pool::{config::MpoolConfig, errors::Error};

/// Moves the pool head to `new_head`. Messages of the `adopted` tipsets are
/// removed, messages of the `dropped` tipsets that did not make it into the
/// new chain are re-added in sequence order as fresh arrivals, and every
/// affected sender is pruned below its new committed sequence.
pub(in crate::message_pool) fn head_change<T>(
    api: &T,
    state: &RwLock<PoolState>,
    validator: &MessageValidator,
    config: &MpoolConfig,
    dropped: &[Arc<Tipset>],
    adopted: &[Arc<Tipset>],
    new_head: Arc<Tipset>,
) -> Result<(), Error>
where
    T: Provider,
{
    let mut reinstate: HashMap<Address, BTreeMap<u64, SignedMessage>> = HashMap::new();
    for ts in dropped {
        for msg in api.messages_for_tipset(ts)? {
            reinstate
                .entry(msg.from())
                .or_default()
                .insert(msg.sequence(), msg);
        }
    }

    let mut applied = Vec::new();
    for ts in adopted {
        for msg in api.messages_for_tipset(ts)? {
            let from = msg.from();
            if let Some(msgs) = reinstate.get_mut(&from) {
                msgs.remove(&msg.sequence());
            }
            applied.push((from, msg.sequence()));
        }
    }

    let mut committed = HashMap::new();
    for from in applied.iter().map(|(from, _)| from).chain(reinstate.keys()) {
        if !committed.contains_key(from) {
            committed.insert(*from, api.get_actor_after(from, &new_head)?);
        }
    }

    let mut state = state.write();
    state.head = new_head;
    for (from, sequence) in &applied {
        state.remove(from, *sequence);
    }
    for (from, actor) in &committed {
        state.prune(from, actor.sequence);
    }
    for (from, msgs) in reinstate {
        let Some(actor) = committed.get(&from).copied() else {
            continue;
        };
        for msg in msgs.into_values() {
            if msg.sequence() < actor.sequence {
                continue;
            }
            let cid = msg.cid();
            if let Err(e) = add_locked(&mut state, validator, config, actor, msg) {
                debug!("Failed to reinstate message {cid}: {e}");
            }
        }
    }
    state.update_metrics();
    Ok(())
}

/// Moves the pool head to `target` by walking both chains back to their
/// common ancestor. Used when head change events were missed.
pub(in crate::message_pool) fn resync<T>(
    api: &T,
    state: &RwLock<PoolState>,
    validator: &MessageValidator,
    config: &MpoolConfig,
    target: Arc<Tipset>,
) -> Result<(), Error>
where
    T: Provider,
{
    let current = state.read().head.clone();
    if current.key() == target.key() {
        return Ok(());
    }
    let (dropped, adopted) = reorg_path(api, current, target.clone())?;
    head_change(api, state, validator, config, &dropped, &adopted, target)
}

/// Tipsets between `from` and `to`: the ones only on the `from` side newest
/// first, and the ones only on the `to` side oldest first.
pub(in crate::message_pool) fn reorg_path<T>(
    api: &T,
    from: Arc<Tipset>,
    to: Arc<Tipset>,
) -> Result<(Vec<Arc<Tipset>>, Vec<Arc<Tipset>>), Error>
where
    T: Provider,
{
    let mut left = from;
    let mut right = to;
    let mut left_chain = Vec::new();
    let mut right_chain = Vec::new();
    while left.key() != right.key() {
        if left.epoch() > right.epoch() {
            let parent = api.load_tipset(left.parents())?;
            left_chain.push(std::mem::replace(&mut left, parent));
        } else {
            let parent = api.load_tipset(right.parents())?;
            right_chain.push(std::mem::replace(&mut right, parent));
        }
    }
    right_chain.reverse();
    Ok((left_chain, right_chain))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::msg_pool::tests::{Harness, harness};
    use super::*;
    use crate::blocks::FullTipset;
    use crate::chain::HeadChange;
    use crate::chain_sync::SyncOutcome;
    use crate::test_utils::{KEYS, signed_transfer};

    async fn commit(h: &Harness, ts: &FullTipset) -> Arc<HeadChange> {
        match h.engine.sync(ts.clone(), None).await.unwrap() {
            SyncOutcome::Committed(Some(change)) => change,
            other => panic!("head did not move: {other:?}"),
        }
    }

    fn sequences(h: &Harness, key: usize) -> Vec<u64> {
        h.pool
            .pending_for(&KEYS[key].address())
            .unwrap_or_default()
            .iter()
            .map(|m| m.sequence())
            .collect()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn included_messages_leave_the_pool() {
        let mut h = harness(Default::default());
        h.services.shutdown().await;
        let msgs: Vec<_> = (0..3).map(|s| signed_transfer(&KEYS[0], s, 1)).collect();
        for msg in &msgs {
            h.pool.add(msg.clone()).unwrap();
        }
        let block = h
            .chain
            .block_on(&h.chain.genesis_tipset(), &KEYS[7], msgs[..2].to_vec());
        let change = commit(&h, &FullTipset::from(block)).await;
        h.pool.head_change(&change).unwrap();

        assert_eq!(sequences(&h, 0), vec![2]);
        assert_eq!(h.pool.get_sequence(&KEYS[0].address()).unwrap(), 3);
        assert_eq!(h.pool.current_tipset().key(), change.new_head.key());
        assert_eq!(h.pool.len(), 1);
    }

    #[tokio::test]
    async fn reorg_reinstates_dropped_messages() {
        let mut h = harness(Default::default());
        h.services.shutdown().await;
        let genesis = h.chain.genesis_tipset();
        let msgs: Vec<_> = (0..2).map(|s| signed_transfer(&KEYS[0], s, 1)).collect();
        for msg in &msgs {
            h.pool.add(msg.clone()).unwrap();
        }

        let included = FullTipset::from(h.chain.block_on(&genesis, &KEYS[7], msgs.clone()));
        let change = commit(&h, &included).await;
        h.pool.head_change(&change).unwrap();
        assert!(h.pool.is_empty());

        // A longer fork without the messages orphans them.
        let fork = h.chain.extend(&genesis, 2, &KEYS[6]);
        h.fetcher.add(&fork[0]);
        let change = commit(&h, &fork[1]).await;
        assert_eq!(change.dropped.len(), 1);
        assert_eq!(change.adopted.len(), 2);
        h.pool.head_change(&change).unwrap();
        assert_eq!(sequences(&h, 0), vec![0, 1]);
        assert_eq!(h.pool.get_sequence(&KEYS[0].address()).unwrap(), 2);
        assert_eq!(h.pool.select_for_block(10, usize::MAX), msgs);

        // Including one of them on the fork removes only that one.
        let next = FullTipset::from(h.chain.block_on(&fork[1], &KEYS[6], msgs[..1].to_vec()));
        let change = commit(&h, &next).await;
        h.pool.head_change(&change).unwrap();
        assert_eq!(sequences(&h, 0), vec![1]);
    }

    #[tokio::test]
    async fn conflicting_message_on_new_chain_wins() {
        let mut h = harness(Default::default());
        h.services.shutdown().await;
        let pooled = signed_transfer(&KEYS[0], 0, 1);
        h.pool.add(pooled).unwrap();
        let replacement = signed_transfer(&KEYS[0], 0, 2);
        let block = h
            .chain
            .block_on(&h.chain.genesis_tipset(), &KEYS[7], vec![replacement]);
        let change = commit(&h, &FullTipset::from(block)).await;
        h.pool.head_change(&change).unwrap();
        assert!(h.pool.is_empty());
    }

    #[tokio::test]
    async fn resync_walks_from_pool_head() {
        let mut h = harness(Default::default());
        h.services.shutdown().await;
        let genesis = h.chain.genesis_tipset();
        for s in 0..3 {
            h.pool.add(signed_transfer(&KEYS[1], s, 1)).unwrap();
        }
        let first = FullTipset::from(h.chain.block_on(
            &genesis,
            &KEYS[7],
            vec![signed_transfer(&KEYS[1], 0, 1)],
        ));
        let second = FullTipset::from(h.chain.block_on(
            &first,
            &KEYS[7],
            vec![signed_transfer(&KEYS[1], 1, 1)],
        ));
        h.engine.sync(first.clone(), None).await.unwrap();
        h.engine.sync(second.clone(), None).await.unwrap();

        resync(
            h.pool.api.as_ref(),
            &h.pool.state,
            &h.pool.validator,
            &h.pool.config,
            h.engine.head(),
        )
        .unwrap();
        assert_eq!(h.pool.current_tipset().key(), second.key());
        assert_eq!(sequences(&h, 1), vec![2]);
    }

    #[tokio::test]
    async fn reorg_path_orders_both_sides() {
        let mut h = harness(Default::default());
        h.services.shutdown().await;
        let genesis = h.chain.genesis_tipset();
        let left = h.chain.extend(&genesis, 2, &KEYS[6]);
        let right = h.chain.extend(&genesis, 3, &KEYS[7]);
        for ts in left.iter().chain(&right) {
            h.engine.sync(ts.clone(), None).await.unwrap();
        }
        let tip = |ts: &FullTipset| h.engine.tipset(ts.key()).unwrap();
        let (dropped, adopted) =
            reorg_path(h.pool.api.as_ref(), tip(&left[1]), tip(&right[2])).unwrap();
        let keys = |chain: &[Arc<Tipset>]| chain.iter().map(|ts| ts.key().clone()).collect::<Vec<_>>();
        assert_eq!(keys(&dropped), vec![left[1].key().clone(), left[0].key().clone()]);
        assert_eq!(
            keys(&adopted),
            right.iter().map(|ts| ts.key().clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn pool_follows_engine_head() {
        let h = harness(Default::default());
        h.pool.add(signed_transfer(&KEYS[2], 0, 1)).unwrap();
        h.pool.add(signed_transfer(&KEYS[2], 1, 1)).unwrap();
        let block = h.chain.block_on(
            &h.chain.genesis_tipset(),
            &KEYS[7],
            vec![signed_transfer(&KEYS[2], 0, 1)],
        );
        let ts = FullTipset::from(block);
        h.engine.sync(ts.clone(), None).await.unwrap();
        wait_until(|| h.pool.current_tipset().key() == ts.key()).await;
        assert_eq!(sequences(&h, 2), vec![1]);
    }
}
