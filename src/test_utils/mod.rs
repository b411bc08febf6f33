// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use ahash::HashMap;
use async_trait::async_trait;
use cid::Cid;
use parking_lot::Mutex;

use crate::blocks::{Block, FullTipset, RawBlockHeader, Ticket, compute_msg_root, ticket_input};
use crate::chain_sync::{
    BlockFetcher, ChainEngine, FetchError, PeerId, SignatureTicketVerifier, SyncConfig,
};
use crate::crypto::{Address, KeyPair};
use crate::db::MemoryDB;
use crate::genesis::{GenesisAccount, GenesisConfig, create_genesis};
use crate::interpreter::{LedgerVm, StateTransition as _};
use crate::message::{SignedMessage, TokenAmount, UnsignedMessage};

/// Deterministic keys, all funded in [`genesis_config`].
pub static KEYS: LazyLock<Vec<KeyPair>> = LazyLock::new(|| {
    (0..8)
        .map(|i| KeyPair::from_seed(format!("key-{i}").as_bytes()).unwrap())
        .collect()
});

pub const INITIAL_BALANCE: TokenAmount = 1_000_000;

/// Recipient of every test transfer. Not one of [`KEYS`].
pub const SINK: Address = Address::from_bytes([0xee; 20]);

pub fn genesis_config() -> GenesisConfig {
    GenesisConfig {
        timestamp: 0,
        accounts: KEYS
            .iter()
            .map(|key| GenesisAccount {
                address: key.address().to_string(),
                balance: INITIAL_BALANCE,
            })
            .collect(),
    }
}

/// A value transfer of 1 with gas limit 1, so its required funds are
/// `1 + premium`.
pub fn signed_transfer(key: &KeyPair, sequence: u64, premium: TokenAmount) -> SignedMessage {
    let message = UnsignedMessage {
        from: key.address(),
        to: SINK,
        sequence,
        value: 1,
        gas_limit: 1,
        gas_premium: premium,
        ..Default::default()
    };
    SignedMessage::sign(message, key).unwrap()
}

/// Builds valid blocks on top of the genesis of [`genesis_config`]. Every
/// block built is persisted in the builder's own database, which plays the
/// role of the network.
pub struct TestChain {
    pub db: Arc<MemoryDB>,
    pub vm: LedgerVm<Arc<MemoryDB>>,
    genesis: Block,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    pub fn new() -> Self {
        let db = Arc::new(MemoryDB::default());
        let genesis = create_genesis(&db, &genesis_config()).unwrap();
        Self {
            vm: LedgerVm::new(db.clone()),
            db,
            genesis,
        }
    }

    pub fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }

    pub fn genesis_tipset(&self) -> FullTipset {
        FullTipset::from(self.genesis.clone())
    }

    /// A fresh node database holding only the genesis state and block.
    pub fn node_db(&self) -> Arc<MemoryDB> {
        let db = Arc::new(MemoryDB::default());
        create_genesis(&db, &genesis_config()).unwrap();
        db
    }

    /// Post-execution state of `ts`, or the default CID when its messages
    /// do not apply.
    pub fn post_state(&self, ts: &FullTipset) -> Cid {
        if ts.parents().is_empty() {
            return *ts.parent_state();
        }
        self.vm
            .apply(ts.parent_state(), &ts.messages())
            .map(|ret| ret.state_root)
            .unwrap_or_default()
    }

    /// A valid block mined by `miner` on top of `parent`.
    pub fn block_on(
        &self,
        parent: &FullTipset,
        miner: &KeyPair,
        messages: Vec<SignedMessage>,
    ) -> Block {
        self.block_with(parent, miner, messages, |_| {})
    }

    /// Like [`TestChain::block_on`], with `tweak` applied to the header
    /// before it is signed.
    pub fn block_with(
        &self,
        parent: &FullTipset,
        miner: &KeyPair,
        messages: Vec<SignedMessage>,
        tweak: impl FnOnce(&mut RawBlockHeader),
    ) -> Block {
        let epoch = parent.epoch() + 1;
        let mut header = RawBlockHeader {
            miner: miner.address(),
            ticket: Some(Ticket::new(
                miner.sign(&ticket_input(parent.key(), epoch)),
            )),
            parents: parent.key().clone(),
            epoch,
            state_root: self.post_state(parent),
            messages: compute_msg_root(&messages),
            timestamp: epoch as u64 * 30,
            signature: None,
        };
        tweak(&mut header);
        header.signature = Some(miner.sign(&header.to_signing_bytes()));
        let block = Block {
            header: header.into(),
            messages,
        };
        block.persist(&self.db).unwrap();
        block
    }

    /// `n` single-block tipsets mined by `miner` on top of `parent`.
    pub fn extend(&self, parent: &FullTipset, n: usize, miner: &KeyPair) -> Vec<FullTipset> {
        let mut out: Vec<FullTipset> = Vec::with_capacity(n);
        for _ in 0..n {
            let tip = out.last().unwrap_or(parent);
            let next = FullTipset::from(self.block_on(tip, miner, vec![]));
            out.push(next);
        }
        out
    }

    /// A chain engine backed by a fresh node database.
    pub fn engine(
        &self,
        fetcher: Arc<dyn BlockFetcher>,
        config: SyncConfig,
    ) -> ChainEngine<MemoryDB> {
        let db = self.node_db();
        ChainEngine::new(
            db.clone(),
            db.clone(),
            &self.genesis,
            Arc::new(LedgerVm::new(db)),
            Arc::new(SignatureTicketVerifier),
            fetcher,
            config,
        )
        .unwrap()
    }
}

/// Scripted [`BlockFetcher`] serving a fixed set of blocks.
#[derive(Default)]
pub struct MockFetcher {
    blocks: Mutex<HashMap<Cid, Block>>,
    requests: AtomicUsize,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn add(&self, ts: &FullTipset) {
        for block in ts.blocks() {
            self.add_block(block.clone());
        }
    }

    pub fn add_all<'a>(&self, tipsets: impl IntoIterator<Item = &'a FullTipset>) {
        for ts in tipsets {
            self.add(ts);
        }
    }

    pub fn add_block(&self, block: Block) {
        self.blocks.lock().insert(*block.cid(), block);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockFetcher for MockFetcher {
    async fn fetch_block(&self, cid: Cid, _peer: Option<PeerId>) -> Result<Block, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.blocks
            .lock()
            .get(&cid)
            .cloned()
            .ok_or(FetchError::NotFound(cid))
    }
}
