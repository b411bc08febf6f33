// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context as _;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blocks::{Block, RawBlockHeader, TipsetKey, compute_msg_root};
use crate::crypto::Address;
use crate::interpreter::LedgerVm;
use crate::message::TokenAmount;

/// An account funded in the genesis state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// `f1` address of the account.
    pub address: String,
    pub balance: TokenAmount,
}

/// Parameters of the genesis block. Two nodes with the same genesis
/// configuration build byte-identical genesis blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub timestamp: u64,
    pub accounts: Vec<GenesisAccount>,
}

impl GenesisConfig {
    pub fn balances(&self) -> anyhow::Result<Vec<(Address, TokenAmount)>> {
        self.accounts
            .iter()
            .map(|acc| {
                let addr = acc
                    .address
                    .parse::<Address>()
                    .with_context(|| format!("invalid genesis account {}", acc.address))?;
                Ok((addr, acc.balance))
            })
            .collect()
    }
}

/// Writes the genesis state and the genesis block to `db` and returns the
/// block. The genesis block is unsigned, has no ticket and no parents.
pub fn create_genesis<DB: Blockstore>(db: &DB, config: &GenesisConfig) -> anyhow::Result<Block> {
    let state_root = LedgerVm::new(db).create_state(config.balances()?)?;
    let header = RawBlockHeader {
        miner: Address::default(),
        ticket: None,
        parents: TipsetKey::default(),
        epoch: 0,
        state_root,
        messages: compute_msg_root(&[]),
        timestamp: config.timestamp,
        signature: None,
    };
    let block = Block {
        header: header.into(),
        messages: vec![],
    };
    block.persist(db)?;
    info!("Initialized genesis: {}", block.cid());
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::interpreter::StateTransition as _;
    use crate::test_utils::KEYS;

    fn config() -> GenesisConfig {
        GenesisConfig {
            timestamp: 1,
            accounts: vec![GenesisAccount {
                address: KEYS[0].address().to_string(),
                balance: 1000,
            }],
        }
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = create_genesis(&MemoryDB::default(), &config()).unwrap();
        let b = create_genesis(&MemoryDB::default(), &config()).unwrap();
        assert_eq!(a.cid(), b.cid());
        assert!(a.header.parents.is_empty());
    }

    #[test]
    fn genesis_funds_accounts() {
        let db = MemoryDB::default();
        let genesis = create_genesis(&db, &config()).unwrap();
        let actor = LedgerVm::new(&db)
            .actor(&genesis.header.state_root, &KEYS[0].address())
            .unwrap()
            .unwrap();
        assert_eq!(actor.balance, 1000);
        assert_eq!(Block::load(&db, *genesis.cid()).unwrap(), Some(genesis));
    }

    #[test]
    fn bad_account_address() {
        let mut cfg = config();
        cfg.accounts[0].address = "nonsense".into();
        assert!(create_genesis(&MemoryDB::default(), &cfg).is_err());
    }
}
