// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Contains the implementation of Message Pool component.
// The Message Pool holds validated messages that are not yet part of the
// canonical chain, keyed by sender and sequence, and follows the head of the
// chain engine to drop included messages and reinstate orphaned ones.

use std::{cmp::Reverse, collections::BTreeMap, sync::Arc};

use ahash::HashMap;
use chrono::{DateTime, Utc};
use cid::Cid;
use parking_lot::RwLock;
use tokio::{sync::broadcast::error::RecvError, task::JoinSet};
use tracing::{debug, warn};

use crate::blocks::Tipset;
use crate::chain::HeadChange;
use crate::chain_sync::{MessageValidator, PoolView};
use crate::crypto::Address;
use crate::interpreter::ActorState;
use crate::message::{Message as _, SignedMessage, TokenAmount};
use crate::message_pool::{
    config::MpoolConfig,
    errors::Error,
    metrics,
    msgpool::{head_change, provider::Provider, resync},
};

/// A pending message together with the order it was received in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolEntry {
    pub message: SignedMessage,
    pub received_at: DateTime<Utc>,
    /// Admission counter, breaks ties between messages received in the same
    /// instant.
    pub arrival: u64,
}

/// Pending messages of one sender, keyed by sequence.
#[derive(Clone, Default, Debug)]
pub struct MsgSet {
    pub(in crate::message_pool) msgs: BTreeMap<u64, PoolEntry>,
    committed: u64,
}

impl MsgSet {
    /// Generate a new `MsgSet` for a sender whose committed sequence is
    /// `committed`.
    pub fn new(committed: u64) -> Self {
        MsgSet {
            msgs: BTreeMap::new(),
            committed,
        }
    }

    /// Sequence of the sender in the committed state of the pool head.
    pub fn committed_sequence(&self) -> u64 {
        self.committed
    }

    /// First missing sequence after the committed one.
    pub fn next_sequence(&self) -> u64 {
        let mut next = self.committed;
        while self.msgs.contains_key(&next) {
            next += 1;
        }
        next
    }

    /// The contiguous run of messages starting at the committed sequence.
    /// Entries past a gap are never part of it.
    pub fn executable(&self) -> impl Iterator<Item = &PoolEntry> {
        self.msgs
            .range(self.committed..)
            .zip(self.committed..)
            .take_while(|((sequence, _), expected)| **sequence == *expected)
            .map(|((_, entry), _)| entry)
    }

    /// Required funds of every pending message of the sender except the one
    /// at `sequence`. A replacement is checked against the messages both
    /// below and above it.
    fn pending_funds_except(&self, sequence: u64) -> TokenAmount {
        self.msgs
            .range(self.committed..)
            .filter(|(s, _)| **s != sequence)
            .map(|(_, entry)| entry.message.required_funds())
            .fold(0, TokenAmount::saturating_add)
    }

    /// Moves the committed sequence and drops every message below it.
    /// Returns the number of dropped messages.
    fn prune(&mut self, committed: u64) -> usize {
        self.committed = committed;
        let kept = self.msgs.split_off(&committed);
        let removed = self.msgs.len();
        self.msgs = kept;
        removed
    }
}

/// Everything guarded by the pool lock.
pub(in crate::message_pool) struct PoolState {
    /// The tipset the pending messages are validated against.
    pub head: Arc<Tipset>,
    pub pending: HashMap<Address, MsgSet>,
    len: usize,
    arrivals: u64,
}

impl PoolState {
    fn new(head: Arc<Tipset>) -> Self {
        Self {
            head,
            pending: HashMap::default(),
            len: 0,
            arrivals: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn remove(&mut self, from: &Address, sequence: u64) -> Option<PoolEntry> {
        let set = self.pending.get_mut(from)?;
        let entry = set.msgs.remove(&sequence)?;
        if set.msgs.is_empty() {
            self.pending.remove(from);
        }
        self.len -= 1;
        Some(entry)
    }

    pub fn prune(&mut self, from: &Address, committed: u64) {
        if let Some(set) = self.pending.get_mut(from) {
            self.len -= set.prune(committed);
            if set.msgs.is_empty() {
                self.pending.remove(from);
            }
        }
    }

    pub fn update_metrics(&self) {
        metrics::MPOOL_MESSAGE_TOTAL.set(self.len as i64);
    }

    fn next_arrival(&mut self) -> u64 {
        self.arrivals += 1;
        self.arrivals
    }
}

/// This contains all necessary information needed for the message pool.
/// Keeps track of messages to apply, as well as context needed for verifying
/// transactions.
pub struct MessagePool<T> {
    /// Pending messages and the tipset they were validated against
    pub(in crate::message_pool) state: Arc<RwLock<PoolState>>,
    /// The underlying provider
    pub api: Arc<T>,
    /// Message admission checks, with a signature cache keyed by Cid
    pub(in crate::message_pool) validator: Arc<MessageValidator>,
    /// Configurable parameters of the message pool
    pub config: Arc<MpoolConfig>,
}

impl<T> MessagePool<T>
where
    T: Provider,
{
    /// Gets the current tipset
    pub fn current_tipset(&self) -> Arc<Tipset> {
        self.state.read().head.clone()
    }

    /// Adds a signed message to the pool after checking it against the
    /// committed state of the current tipset.
    pub fn add(&self, msg: SignedMessage) -> Result<Cid, Error> {
        self.check_message(&msg)?;
        let mut state = self.state.write();
        let actor = self.api.get_actor_after(&msg.from(), &state.head)?;
        let cid = add_locked(&mut state, &self.validator, &self.config, actor, msg)?;
        state.update_metrics();
        Ok(cid)
    }

    /// Decodes a message received from the network and adds it to the pool.
    pub fn push_raw(&self, bytes: &[u8]) -> Result<Cid, Error> {
        if bytes.len() > self.config.max_message_size {
            return Err(Error::MessageTooBig);
        }
        let msg: SignedMessage = fvm_ipld_encoding::from_slice(bytes)?;
        self.add(msg)
    }

    fn check_message(&self, msg: &SignedMessage) -> Result<(), Error> {
        if msg.chain_length() > self.config.max_message_size {
            return Err(Error::MessageTooBig);
        }
        self.validator.check_signature(msg)?;
        Ok(())
    }

    /// Applies a head change: included messages leave the pool, orphaned
    /// ones are reinstated.
    pub fn head_change(&self, change: &HeadChange) -> Result<(), Error> {
        head_change(
            self.api.as_ref(),
            &self.state,
            &self.validator,
            &self.config,
            &change.dropped,
            &change.adopted,
            change.new_head.clone(),
        )
    }

    /// Get the sequence a new message from `addr` should use.
    pub fn get_sequence(&self, addr: &Address) -> Result<u64, Error> {
        let state = self.state.read();
        let actor = self.api.get_actor_after(addr, &state.head)?;
        Ok(match state.pending.get(addr) {
            Some(set) if set.committed_sequence() == actor.sequence => set.next_sequence(),
            _ => actor.sequence,
        })
    }

    /// Return a tuple that contains a vector of all signed messages and the
    /// current tipset for self. Messages are grouped by sender in sequence
    /// order.
    pub fn pending(&self) -> (Vec<SignedMessage>, Arc<Tipset>) {
        let state = self.state.read();
        let mut senders: Vec<&Address> = state.pending.keys().collect();
        senders.sort();
        let out = senders
            .into_iter()
            .flat_map(|addr| state.pending[addr].msgs.values())
            .map(|entry| entry.message.clone())
            .collect();
        (out, state.head.clone())
    }

    /// Return a Vector of signed messages for a given from address. This vector
    /// will be sorted by each `message`'s sequence. If no corresponding
    /// messages found, return None result type.
    pub fn pending_for(&self, a: &Address) -> Option<Vec<SignedMessage>> {
        let state = self.state.read();
        let set = state.pending.get(a)?;
        Some(
            set.msgs
                .values()
                .map(|entry| entry.message.clone())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> MessagePool<T>
where
    T: Provider + Send + Sync + 'static,
{
    /// Creates a new `MessagePool` instance following the head of `api`.
    pub fn new(
        api: T,
        config: MpoolConfig,
        services: &mut JoinSet<anyhow::Result<()>>,
    ) -> Result<MessagePool<T>, Error> {
        let mut subscriber = api.subscribe_head_changes();
        let state = Arc::new(RwLock::new(PoolState::new(api.get_heaviest_tipset())));
        let mp = MessagePool {
            state,
            api: Arc::new(api),
            validator: Arc::new(MessageValidator::new(config.sig_cache_size)),
            config: Arc::new(config),
        };

        let api = mp.api.clone();
        let state = mp.state.clone();
        let validator = mp.validator.clone();
        let config = mp.config.clone();

        // Reacts to new HeadChanges
        services.spawn(async move {
            loop {
                match subscriber.recv().await {
                    Ok(change) => {
                        let current = state.read().head.clone();
                        let result = if current.key() == change.old_head.key() {
                            head_change(
                                api.as_ref(),
                                &state,
                                &validator,
                                &config,
                                &change.dropped,
                                &change.adopted,
                                change.new_head.clone(),
                            )
                        } else if current.key() != change.new_head.key() {
                            resync(
                                api.as_ref(),
                                &state,
                                &validator,
                                &config,
                                change.new_head.clone(),
                            )
                        } else {
                            Ok(())
                        };
                        if let Err(e) = result {
                            warn!("Error changing message pool head: {e}");
                        }
                    }
                    Err(RecvError::Lagged(e)) => {
                        warn!("Head change subscriber lagged: skipping {e} events");
                        if let Err(e) = resync(
                            api.as_ref(),
                            &state,
                            &validator,
                            &config,
                            api.get_heaviest_tipset(),
                        ) {
                            warn!("Failed to resynchronise message pool: {e}");
                        }
                    }
                    Err(RecvError::Closed) => {
                        break Ok(());
                    }
                }
            }
        });
        Ok(mp)
    }
}

// Helpers for MessagePool

/// Validates `msg` against the committed state `actor` of its sender and the
/// messages already pending, then inserts it. Replacements, capacity
/// eviction and idempotent resubmission are handled here. The caller holds
/// the pool lock.
pub(in crate::message_pool) fn add_locked(
    state: &mut PoolState,
    validator: &MessageValidator,
    config: &MpoolConfig,
    actor: ActorState,
    msg: SignedMessage,
) -> Result<Cid, Error> {
    let from = msg.from();
    let sequence = msg.sequence();
    let cid = msg.cid();

    state.prune(&from, actor.sequence);
    let set = state.pending.get(&from);
    let existing = set.and_then(|set| set.msgs.get(&sequence));
    if existing.is_some_and(|entry| entry.message.cid() == cid) {
        return Ok(cid);
    }
    let replaced = existing.map(|entry| entry.message.gas_premium());
    let sender_pending = set.map_or(0, |set| set.msgs.len());

    let view = PoolView {
        committed_sequence: actor.sequence,
        next_sequence: set.map_or(actor.sequence, MsgSet::next_sequence),
        balance: actor.balance,
        pending_funds: set.map_or(0, |set| set.pending_funds_except(sequence)),
    };
    validator.validate_message(&msg, &view)?;

    match replaced {
        Some(premium) => {
            let minimum = config.replacement_premium(premium);
            if msg.gas_premium() < minimum {
                return Err(Error::ReplaceByFeeTooLow {
                    premium: msg.gas_premium(),
                    minimum,
                });
            }
        }
        None => {
            if sender_pending >= config.max_actor_pending_messages {
                return Err(Error::TooManyPendingMessages(from));
            }
            if state.len() >= config.size_limit {
                evict_for(state, &msg)?;
            }
        }
    }

    let entry = PoolEntry {
        message: msg,
        received_at: Utc::now(),
        arrival: state.next_arrival(),
    };
    let set = state
        .pending
        .entry(from)
        .or_insert_with(|| MsgSet::new(actor.sequence));
    if set.msgs.insert(sequence, entry).is_none() {
        state.len += 1;
    }
    Ok(cid)
}

/// Frees one slot for `incoming` by evicting the lowest priority sender
/// tail, newest arrival first on ties. Only tails are evicted, so no sender
/// is left with a gap. Fails with [`Error::PoolFull`] when `incoming` itself
/// ranks lowest.
fn evict_for(state: &mut PoolState, incoming: &SignedMessage) -> Result<(), Error> {
    let from = incoming.from();
    let incoming_rank = (incoming.gas_premium(), Reverse(u64::MAX));
    let victim = state
        .pending
        .iter()
        .filter_map(|(addr, set)| {
            let (sequence, entry) = set.msgs.last_key_value()?;
            // `incoming` becomes the new tail of its sender
            if *addr == from && incoming.sequence() > *sequence {
                return None;
            }
            Some((
                (entry.message.gas_premium(), Reverse(entry.arrival)),
                *addr,
                *sequence,
            ))
        })
        .min_by_key(|(rank, ..)| *rank);
    match victim {
        Some((rank, addr, sequence)) if rank < incoming_rank => {
            if let Some(entry) = state.remove(&addr, sequence) {
                debug!(
                    "Evicted message {} from {addr} to make room for {}",
                    entry.message.cid(),
                    incoming.cid()
                );
                metrics::MPOOL_EVICTED_TOTAL.inc();
            }
            Ok(())
        }
        _ => Err(Error::PoolFull),
    }
}

#[cfg(test)]
pub(in crate::message_pool) mod tests {
    use rstest::rstest;

    use super::*;
    use crate::chain_sync::MessageValidationError;
    use crate::db::MemoryDB;
    use crate::message::Message as _;
    use crate::message_pool::MpoolChainProvider;
    use crate::test_utils::{INITIAL_BALANCE, KEYS, MockFetcher, TestChain, signed_transfer};

    pub type TestPool = MessagePool<MpoolChainProvider<MemoryDB>>;

    /// A pool following a fresh engine at genesis. The head-change service
    /// runs in `services`.
    pub struct Harness {
        pub chain: TestChain,
        pub fetcher: Arc<MockFetcher>,
        pub engine: crate::chain_sync::ChainEngine<MemoryDB>,
        pub pool: TestPool,
        pub services: JoinSet<anyhow::Result<()>>,
    }

    pub fn harness(config: MpoolConfig) -> Harness {
        let chain = TestChain::new();
        let fetcher = Arc::new(MockFetcher::default());
        let engine = chain.engine(fetcher.clone(), Default::default());
        let mut services = JoinSet::new();
        let pool = MessagePool::new(
            MpoolChainProvider::from_engine(&engine),
            config,
            &mut services,
        )
        .unwrap();
        Harness {
            chain,
            fetcher,
            engine,
            pool,
            services,
        }
    }

    fn premiums(msgs: &[SignedMessage]) -> Vec<TokenAmount> {
        msgs.iter().map(|m| m.gas_premium()).collect()
    }

    #[tokio::test]
    async fn sequential_nonces_are_accepted() {
        let h = harness(Default::default());
        let sender = KEYS[0].address();
        for sequence in 0..3 {
            h.pool.add(signed_transfer(&KEYS[0], sequence, 1)).unwrap();
        }
        assert_eq!(h.pool.len(), 3);
        assert_eq!(h.pool.get_sequence(&sender).unwrap(), 3);
        let pending = h.pool.pending_for(&sender).unwrap();
        assert_eq!(
            pending.iter().map(|m| m.sequence()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(h.pool.get_sequence(&KEYS[1].address()).unwrap(), 0);
        assert!(h.pool.pending_for(&KEYS[1].address()).is_none());
    }

    #[tokio::test]
    async fn nonce_gap_is_rejected() {
        let h = harness(Default::default());
        h.pool.add(signed_transfer(&KEYS[0], 0, 1)).unwrap();
        assert_eq!(
            h.pool.add(signed_transfer(&KEYS[0], 2, 1)),
            Err(Error::Invalid(MessageValidationError::NonceGap {
                expected: 1,
                actual: 2
            }))
        );
        assert_eq!(h.pool.len(), 1);
    }

    #[tokio::test]
    async fn resubmission_is_idempotent() {
        let h = harness(Default::default());
        let msg = signed_transfer(&KEYS[0], 0, 3);
        let cid = h.pool.add(msg.clone()).unwrap();
        assert_eq!(h.pool.add(msg).unwrap(), cid);
        assert_eq!(h.pool.len(), 1);
    }

    #[rstest]
    #[case::strict_lower(0, 10, 9, Err(Error::ReplaceByFeeTooLow { premium: 9, minimum: 11 }))]
    #[case::strict_equal(0, 10, 10, Err(Error::ReplaceByFeeTooLow { premium: 10, minimum: 11 }))]
    #[case::strict_higher(0, 10, 11, Ok(()))]
    #[case::bump_short(25, 10, 12, Err(Error::ReplaceByFeeTooLow { premium: 12, minimum: 13 }))]
    #[case::bump_met(25, 10, 13, Ok(()))]
    #[tokio::test]
    async fn replace_by_fee(
        #[case] bump: u64,
        #[case] old: TokenAmount,
        #[case] new: TokenAmount,
        #[case] expected: Result<(), Error>,
    ) {
        let h = harness(MpoolConfig {
            replace_by_fee_bump_percent: bump,
            ..Default::default()
        });
        let sender = KEYS[0].address();
        h.pool.add(signed_transfer(&KEYS[0], 0, old)).unwrap();
        let replacement = signed_transfer(&KEYS[0], 0, new);
        let cid = replacement.cid();
        assert_eq!(h.pool.add(replacement).map(|_| ()), expected);
        let pending = h.pool.pending_for(&sender).unwrap();
        assert_eq!(pending.len(), 1);
        if expected.is_ok() {
            assert_eq!(pending[0].cid(), cid);
        } else {
            assert_eq!(premiums(&pending), vec![old]);
        }
    }

    #[tokio::test]
    async fn pending_messages_count_against_balance() {
        let h = harness(Default::default());
        h.pool.add(signed_transfer(&KEYS[0], 0, 600_000)).unwrap();
        assert_eq!(
            h.pool.add(signed_transfer(&KEYS[0], 1, 500_000)),
            Err(Error::Invalid(MessageValidationError::InsufficientFunds {
                required: 1_100_002,
                balance: INITIAL_BALANCE
            }))
        );
        // Replacing the only message counts its own funds.
        h.pool.add(signed_transfer(&KEYS[0], 0, 900_000)).unwrap();
    }

    #[tokio::test]
    async fn replacement_counts_later_nonces_against_balance() {
        let h = harness(Default::default());
        let sender = KEYS[0].address();
        h.pool.add(signed_transfer(&KEYS[0], 0, 400_000)).unwrap();
        h.pool.add(signed_transfer(&KEYS[0], 1, 400_000)).unwrap();
        assert_eq!(
            h.pool.add(signed_transfer(&KEYS[0], 0, 700_000)),
            Err(Error::Invalid(MessageValidationError::InsufficientFunds {
                required: 1_100_002,
                balance: INITIAL_BALANCE
            }))
        );
        // A bump that still fits next to the later nonce is accepted.
        h.pool.add(signed_transfer(&KEYS[0], 0, 500_000)).unwrap();
        let pending = h.pool.pending_for(&sender).unwrap();
        let total = pending
            .iter()
            .map(|m| m.required_funds())
            .fold(0, TokenAmount::saturating_add);
        assert!(total <= INITIAL_BALANCE);
        assert_eq!(premiums(&pending), vec![500_000, 400_000]);
    }

    #[tokio::test]
    async fn per_actor_limit_allows_replacement() {
        let h = harness(MpoolConfig {
            max_actor_pending_messages: 2,
            ..Default::default()
        });
        h.pool.add(signed_transfer(&KEYS[0], 0, 1)).unwrap();
        h.pool.add(signed_transfer(&KEYS[0], 1, 1)).unwrap();
        assert_eq!(
            h.pool.add(signed_transfer(&KEYS[0], 2, 1)),
            Err(Error::TooManyPendingMessages(KEYS[0].address()))
        );
        h.pool.add(signed_transfer(&KEYS[0], 1, 2)).unwrap();
        h.pool.add(signed_transfer(&KEYS[1], 0, 1)).unwrap();
        assert_eq!(h.pool.len(), 3);
    }

    #[tokio::test]
    async fn eviction_removes_lowest_priority_tail() {
        let h = harness(MpoolConfig {
            size_limit: 3,
            ..Default::default()
        });
        let (a, b, c, d) = (&KEYS[0], &KEYS[1], &KEYS[2], &KEYS[3]);
        h.pool.add(signed_transfer(a, 0, 10)).unwrap();
        h.pool.add(signed_transfer(a, 1, 1)).unwrap();
        h.pool.add(signed_transfer(b, 0, 5)).unwrap();

        h.pool.add(signed_transfer(c, 0, 7)).unwrap();
        assert_eq!(h.pool.len(), 3);
        assert_eq!(premiums(&h.pool.pending_for(&a.address()).unwrap()), vec![10]);
        assert_eq!(h.pool.get_sequence(&a.address()).unwrap(), 1);

        assert_eq!(h.pool.add(signed_transfer(d, 0, 2)), Err(Error::PoolFull));
        assert_eq!(h.pool.len(), 3);
    }

    #[tokio::test]
    async fn eviction_never_opens_a_gap() {
        let h = harness(MpoolConfig {
            size_limit: 2,
            ..Default::default()
        });
        let a = &KEYS[0];
        h.pool.add(signed_transfer(a, 0, 1)).unwrap();
        h.pool.add(signed_transfer(&KEYS[1], 0, 20)).unwrap();
        // Once `a` grows its cheap first message is no longer a tail, so the
        // incoming message is the lowest ranked candidate.
        assert_eq!(h.pool.add(signed_transfer(a, 1, 9)), Err(Error::PoolFull));
        assert_eq!(premiums(&h.pool.pending_for(&a.address()).unwrap()), vec![1]);
        assert_eq!(h.pool.len(), 2);
    }

    #[tokio::test]
    async fn eviction_ties_evict_newest() {
        let h = harness(MpoolConfig {
            size_limit: 2,
            ..Default::default()
        });
        h.pool.add(signed_transfer(&KEYS[0], 0, 3)).unwrap();
        h.pool.add(signed_transfer(&KEYS[1], 0, 3)).unwrap();
        assert_eq!(
            h.pool.add(signed_transfer(&KEYS[2], 0, 3)),
            Err(Error::PoolFull)
        );
        h.pool.add(signed_transfer(&KEYS[2], 0, 4)).unwrap();
        assert!(h.pool.pending_for(&KEYS[0].address()).is_some());
        assert!(h.pool.pending_for(&KEYS[1].address()).is_none());
        assert!(h.pool.pending_for(&KEYS[2].address()).is_some());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let h = harness(MpoolConfig {
            max_message_size: 16,
            ..Default::default()
        });
        let msg = signed_transfer(&KEYS[0], 0, 1);
        assert_eq!(h.pool.add(msg.clone()), Err(Error::MessageTooBig));
        let bytes = fvm_ipld_encoding::to_vec(&msg).unwrap();
        assert_eq!(h.pool.push_raw(&bytes), Err(Error::MessageTooBig));
        assert!(h.pool.is_empty());
    }

    #[tokio::test]
    async fn push_raw_decodes_messages() {
        let h = harness(Default::default());
        let msg = signed_transfer(&KEYS[0], 0, 1);
        let bytes = fvm_ipld_encoding::to_vec(&msg).unwrap();
        assert_eq!(h.pool.push_raw(&bytes).unwrap(), msg.cid());
        assert!(matches!(
            h.pool.push_raw(&[0xff, 0x00, 0x13]),
            Err(Error::Decode(_))
        ));
        assert_eq!(h.pool.len(), 1);
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let h = harness(Default::default());
        let mut msg = signed_transfer(&KEYS[0], 0, 1);
        msg.message.from = KEYS[1].address();
        assert!(matches!(
            h.pool.add(msg),
            Err(Error::Invalid(MessageValidationError::BadSignature(_)))
        ));
    }

    #[test]
    fn executable_run_stops_at_gap() {
        let mut set = MsgSet::new(1);
        for sequence in [1, 2, 4] {
            set.msgs.insert(
                sequence,
                PoolEntry {
                    message: signed_transfer(&KEYS[0], sequence, 1),
                    received_at: Utc::now(),
                    arrival: sequence,
                },
            );
        }
        assert_eq!(set.next_sequence(), 3);
        assert_eq!(
            set.executable()
                .map(|entry| entry.message.sequence())
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(set.pending_funds_except(4), 4);
        assert_eq!(set.pending_funds_except(2), 4);
        assert_eq!(set.pending_funds_except(0), 6);
        assert_eq!(set.prune(2), 1);
        assert_eq!(set.committed_sequence(), 2);
        assert_eq!(set.next_sequence(), 3);
    }
}
