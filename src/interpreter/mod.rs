// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! State transition seam. The chain engine does not execute messages itself:
//! it hands the deduplicated message list of a tipset to a
//! [`StateTransition`] together with the parent's post-state root.

mod ledger;

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use thiserror::Error;

use crate::crypto::Address;
use crate::message::{SignedMessage, TokenAmount};
pub use ledger::LedgerVm;

/// On-chain state of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ActorState {
    /// Next sequence the account must use.
    pub sequence: u64,
    pub balance: TokenAmount,
}

/// Result of executing one message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Receipt {
    pub exit_code: u32,
    pub gas_used: u64,
}

/// Result of applying the messages of a tipset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyRet {
    pub state_root: Cid,
    pub receipt_root: Cid,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("message {cid} from {from} has sequence {actual}, expected {expected}")]
    SequenceMismatch {
        cid: Cid,
        from: Address,
        expected: u64,
        actual: u64,
    },
    #[error("message {cid} from {from} requires {required} but balance is {balance}")]
    InsufficientFunds {
        cid: Cid,
        from: Address,
        required: TokenAmount,
        balance: TokenAmount,
    },
    #[error("failed to read state from the database: {0}")]
    Lookup(#[from] anyhow::Error),
}

/// The state-transition function consumed by the chain engine.
pub trait StateTransition: Send + Sync {
    /// Applies `messages` in order on top of `state_root`.
    fn apply(&self, state_root: &Cid, messages: &[SignedMessage]) -> Result<ApplyRet, ApplyError>;

    /// Looks up an account in the state identified by `state_root`.
    fn actor(&self, state_root: &Cid, addr: &Address) -> anyhow::Result<Option<ActorState>>;
}

impl<T: StateTransition + ?Sized> StateTransition for std::sync::Arc<T> {
    fn apply(&self, state_root: &Cid, messages: &[SignedMessage]) -> Result<ApplyRet, ApplyError> {
        (**self).apply(state_root, messages)
    }

    fn actor(&self, state_root: &Cid, addr: &Address) -> anyhow::Result<Option<ActorState>> {
        (**self).actor(state_root, addr)
    }
}
