// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::blocks::{Block, RawBlockHeader, Ticket, compute_msg_root, ticket_input};
use crate::chain_sync::SyncOutcome;
use crate::cli_shared::cli::MiningConfig;
use crate::crypto::KeyPair;
use crate::message::SignedMessage;
use crate::node_api::{MiningApi, MiningBase};

/// Produces one block per tick on top of the node's mining base, filled
/// with the best pending messages.
pub struct BlockProducer {
    key: KeyPair,
    api: Arc<dyn MiningApi>,
    config: MiningConfig,
}

impl BlockProducer {
    pub fn new(config: MiningConfig, api: Arc<dyn MiningApi>) -> anyhow::Result<Self> {
        let key = KeyPair::from_seed(config.key_seed.as_bytes())
            .context("failed to derive the miner key")?;
        info!("Block producer address: {}", key.address());
        Ok(Self { key, api, config })
    }

    pub fn build_block(
        &self,
        base: &MiningBase,
        messages: Vec<SignedMessage>,
        timestamp: u64,
    ) -> Block {
        let parents = base.tipset.key().clone();
        let epoch = base.tipset.epoch() + 1;
        let mut header = RawBlockHeader {
            miner: self.key.address(),
            ticket: Some(Ticket::new(self.key.sign(&ticket_input(&parents, epoch)))),
            parents,
            epoch,
            state_root: base.state_root,
            messages: compute_msg_root(&messages),
            timestamp: timestamp.max(base.tipset.min_ticket_block().timestamp + 1),
            signature: None,
        };
        header.signature = Some(self.key.sign(&header.to_signing_bytes()));
        Block {
            header: header.into(),
            messages,
        }
    }

    /// Builds a block on the current mining base and submits it.
    pub async fn produce(&self) -> anyhow::Result<SyncOutcome> {
        let base = self.api.mining_base()?;
        let messages = self
            .api
            .select_messages(self.config.max_block_messages, self.config.max_block_size);
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let block = self.build_block(&base, messages, timestamp);
        debug!(
            "Produced block {} at epoch {} with {} messages",
            block.cid(),
            block.header.epoch,
            block.messages.len()
        );
        Ok(self.api.submit_mined_block(block).await?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.block_time_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.produce().await {
                Ok(SyncOutcome::Committed(Some(change))) => {
                    info!("Mined new head {}", change.new_head.key())
                }
                Ok(outcome) => debug!("Mined block not adopted: {outcome:?}"),
                Err(e) => warn!("Block production failed: {e:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::JoinSet;

    use super::*;
    use crate::chain_sync::SyncError;
    use crate::message_pool::{MessagePool, MpoolChainProvider};
    use crate::node_api::NodeApi;
    use crate::test_utils::{KEYS, MockFetcher, TestChain, signed_transfer};

    #[tokio::test]
    async fn produced_blocks_extend_the_head() {
        let chain = TestChain::new();
        let engine = Arc::new(chain.engine(Arc::new(MockFetcher::default()), Default::default()));
        let mut services = JoinSet::new();
        let mpool = Arc::new(
            MessagePool::new(
                MpoolChainProvider::from_engine(&engine),
                Default::default(),
                &mut services,
            )
            .unwrap(),
        );
        let api = NodeApi::new(engine.clone(), mpool);
        let msg = signed_transfer(&KEYS[0], 0, 2);
        api.mpool.push(msg.clone()).unwrap();

        let producer = BlockProducer::new(MiningConfig::default(), api.mining.clone()).unwrap();
        let outcome = producer.produce().await.unwrap();
        let SyncOutcome::Committed(Some(change)) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(change.new_head.epoch(), 1);
        assert_eq!(api.chain.head().key(), change.new_head.key());
        let block = &change.new_head.block_headers()[0];
        assert_eq!(block.miner, producer.key.address());
        assert_eq!(block.messages, compute_msg_root(&[msg]));
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl MiningApi for Unreachable {
        fn mining_base(&self) -> anyhow::Result<MiningBase> {
            anyhow::bail!("no mining base")
        }

        fn select_messages(&self, _max_count: usize, _max_size: usize) -> Vec<SignedMessage> {
            vec![]
        }

        async fn submit_mined_block(&self, _block: Block) -> Result<SyncOutcome, SyncError> {
            Ok(SyncOutcome::AlreadyKnown)
        }
    }

    #[tokio::test]
    async fn missing_base_fails_production() {
        let producer = BlockProducer::new(MiningConfig::default(), Arc::new(Unreachable)).unwrap();
        assert!(producer.produce().await.is_err());
    }

    #[test]
    fn timestamps_increase_along_the_chain() {
        let chain = TestChain::new();
        let genesis = Arc::new(chain.genesis_tipset().to_tipset());
        let base = MiningBase {
            state_root: *genesis.parent_state(),
            tipset: genesis.clone(),
        };
        let producer = BlockProducer::new(MiningConfig::default(), Arc::new(Unreachable)).unwrap();
        let block = producer.build_block(&base, vec![], 0);
        assert!(block.header.timestamp > genesis.min_ticket_block().timestamp);
        assert_eq!(block.header.parents, *genesis.key());
        block
            .header
            .check_block_signature(&producer.key.address())
            .unwrap();
    }
}
