// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use tracing::trace;

use super::{ActorState, ApplyError, ApplyRet, Receipt, StateTransition};
use crate::crypto::Address;
use crate::message::{Message as _, SignedMessage, TokenAmount};
use crate::utils::db::CborStoreExt as _;

/// Account ledger stored as a sorted list, since `dag-cbor` maps only accept
/// string keys.
#[derive(Clone, Debug, Default, Serialize_tuple, Deserialize_tuple)]
struct LedgerState {
    actors: Vec<(Address, ActorState)>,
}

/// Reference state transition: value transfers between accounts. The gas
/// fee (`gas_limit * gas_premium`) is burned.
#[derive(Debug)]
pub struct LedgerVm<DB> {
    db: DB,
}

impl<DB: Blockstore> LedgerVm<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    /// Writes an initial state holding `accounts` and returns its root.
    pub fn create_state(
        &self,
        accounts: impl IntoIterator<Item = (Address, TokenAmount)>,
    ) -> anyhow::Result<Cid> {
        let mut actors = BTreeMap::new();
        for (addr, balance) in accounts {
            actors
                .entry(addr)
                .or_insert_with(ActorState::default)
                .balance += balance;
        }
        self.store(actors)
    }

    fn load(&self, state_root: &Cid) -> anyhow::Result<BTreeMap<Address, ActorState>> {
        let state: LedgerState = self.db.get_cbor_required(state_root)?;
        Ok(state.actors.into_iter().collect())
    }

    fn store(&self, actors: BTreeMap<Address, ActorState>) -> anyhow::Result<Cid> {
        self.db.put_cbor_default(&LedgerState {
            actors: actors.into_iter().collect(),
        })
    }
}

impl<DB: Blockstore + Send + Sync> StateTransition for LedgerVm<DB> {
    fn apply(&self, state_root: &Cid, messages: &[SignedMessage]) -> Result<ApplyRet, ApplyError> {
        let mut actors = self.load(state_root)?;
        let mut receipts = Vec::with_capacity(messages.len());
        for msg in messages {
            let from = msg.from();
            let sender = actors.entry(from).or_default();
            if sender.sequence != msg.sequence() {
                return Err(ApplyError::SequenceMismatch {
                    cid: msg.cid(),
                    from,
                    expected: sender.sequence,
                    actual: msg.sequence(),
                });
            }
            let required = msg.required_funds();
            if sender.balance < required {
                return Err(ApplyError::InsufficientFunds {
                    cid: msg.cid(),
                    from,
                    required,
                    balance: sender.balance,
                });
            }
            sender.balance -= required;
            sender.sequence += 1;
            let recipient = actors.entry(msg.to()).or_default();
            recipient.balance = recipient.balance.saturating_add(msg.value());
            receipts.push(Receipt {
                exit_code: 0,
                gas_used: msg.gas_limit(),
            });
        }
        trace!("applied {} messages on {state_root}", messages.len());
        let state_root = self.store(actors)?;
        let receipt_root = self.db.put_cbor_default(&receipts)?;
        Ok(ApplyRet {
            state_root,
            receipt_root,
        })
    }

    fn actor(&self, state_root: &Cid, addr: &Address) -> anyhow::Result<Option<ActorState>> {
        Ok(self.load(state_root)?.remove(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::test_utils::{KEYS, signed_transfer};

    fn vm_with_funds(balance: TokenAmount) -> (LedgerVm<MemoryDB>, Cid) {
        let vm = LedgerVm::new(MemoryDB::default());
        let root = vm
            .create_state([(KEYS[0].address(), balance)])
            .unwrap();
        (vm, root)
    }

    #[test]
    fn transfers_move_value_and_bump_sequence() {
        let (vm, root) = vm_with_funds(100);
        let msgs = [signed_transfer(&KEYS[0], 0, 2), signed_transfer(&KEYS[0], 1, 2)];
        let ret = vm.apply(&root, &msgs).unwrap();
        let sender = vm.actor(&ret.state_root, &KEYS[0].address()).unwrap().unwrap();
        assert_eq!(sender.sequence, 2);
        assert_eq!(sender.balance, 100 - 2 * msgs[0].required_funds());
        let recipient = vm.actor(&ret.state_root, &msgs[0].to()).unwrap().unwrap();
        assert_eq!(recipient.balance, 2 * msgs[0].value());
        assert!(vm.actor(&ret.state_root, &KEYS[1].address()).unwrap().is_none());
    }

    #[test]
    fn apply_is_deterministic() {
        let (vm, root) = vm_with_funds(100);
        let msgs = [signed_transfer(&KEYS[0], 0, 1)];
        assert_eq!(vm.apply(&root, &msgs).unwrap(), vm.apply(&root, &msgs).unwrap());
        assert_eq!(vm.apply(&root, &[]).unwrap().state_root, root);
    }

    #[test]
    fn sequence_gap_fails() {
        let (vm, root) = vm_with_funds(100);
        let err = vm.apply(&root, &[signed_transfer(&KEYS[0], 1, 1)]).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::SequenceMismatch {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn overspend_fails() {
        let (vm, root) = vm_with_funds(1);
        let err = vm.apply(&root, &[signed_transfer(&KEYS[0], 0, 1)]).unwrap_err();
        assert!(matches!(err, ApplyError::InsufficientFunds { .. }));
    }
}
