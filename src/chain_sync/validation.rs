// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;
use std::sync::Arc;

use cid::Cid;
use hashlink::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use super::{consensus::ProofVerifier, metrics};
use crate::blocks::{BLOCK_MESSAGE_LIMIT, Block, Tipset, TipsetKey, compute_msg_root};
use crate::chain::TipsetMeta;
use crate::message::{Message as _, SignedMessage, TokenAmount};
use crate::metrics::{HistogramTimerExt as _, LRU_CACHE_HIT, LRU_CACHE_MISS, values};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockValidationError {
    #[error("malformed block: {0}")]
    Malformed(String),
    #[error("invalid signature: {0}")]
    BadSignature(String),
    #[error("invalid election proof: {0}")]
    BadProof(String),
    /// The parent tipset is not indexed. Not a property of the block, so
    /// such blocks are never marked bad.
    #[error("parent tipset {0} is not known")]
    StaleParent(TipsetKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageValidationError {
    #[error("invalid signature: {0}")]
    BadSignature(String),
    #[error("sequence {actual} too low, expected at least {expected}")]
    NonceTooLow { expected: u64, actual: u64 },
    #[error("sequence {actual} leaves a gap, expected at most {expected}")]
    NonceGap { expected: u64, actual: u64 },
    #[error("not enough funds: required {required}, balance {balance}")]
    InsufficientFunds {
        required: TokenAmount,
        balance: TokenAmount,
    },
}

/// Checks blocks against their parent. Results of the expensive checks are
/// cached by block CID.
pub struct Validator {
    verifier: Arc<dyn ProofVerifier>,
    validated: Mutex<LruCache<Cid, ()>>,
}

impl Validator {
    pub fn new(verifier: Arc<dyn ProofVerifier>, cache_size: NonZeroUsize) -> Self {
        Self {
            verifier,
            validated: Mutex::new(LruCache::new(cache_size.get())),
        }
    }

    /// Validates `block` against its parent tipset and the parent's
    /// post-execution metadata. `parent` is `None` when the parent is not
    /// indexed.
    pub fn validate_block(
        &self,
        block: &Block,
        parent: Option<(&Tipset, &TipsetMeta)>,
    ) -> Result<(), BlockValidationError> {
        let header = block.header();
        trace!(
            "Validating block: epoch = {}, key = {}",
            header.epoch,
            header.cid()
        );
        let Some((parent, parent_meta)) = parent else {
            return Err(BlockValidationError::StaleParent(header.parents.clone()));
        };
        if &header.parents != parent.key() {
            return Err(BlockValidationError::Malformed(format!(
                "parents {} do not match parent tipset {}",
                header.parents,
                parent.key()
            )));
        }
        if header.epoch != parent.epoch() + 1 {
            return Err(BlockValidationError::Malformed(format!(
                "epoch {} does not follow parent epoch {}",
                header.epoch,
                parent.epoch()
            )));
        }
        block_sanity_checks(block)?;
        if header.state_root != parent_meta.state_root {
            return Err(BlockValidationError::Malformed(format!(
                "parent state root did not match computed state: {} (header), {} (computed)",
                header.state_root, parent_meta.state_root
            )));
        }
        let msg_root = compute_msg_root(block.messages());
        if header.messages != msg_root {
            return Err(BlockValidationError::Malformed(format!(
                "block message root does not match: expected {}, computed {msg_root}",
                header.messages
            )));
        }

        if self.validated.lock().contains_key(block.cid()) {
            LRU_CACHE_HIT.get_or_create(&values::BLOCK_VALIDATION).inc();
            return Ok(());
        }
        LRU_CACHE_MISS.get_or_create(&values::BLOCK_VALIDATION).inc();
        let _timer = metrics::BLOCK_VALIDATION_TIME.start_timer();

        self.verifier
            .verify_ticket(header)
            .map_err(|e| BlockValidationError::BadProof(format!("{e:#}")))?;
        header
            .check_block_signature(&header.miner)
            .map_err(|e| BlockValidationError::BadSignature(e.to_string()))?;
        for msg in block.messages() {
            msg.verify().map_err(|e| {
                BlockValidationError::BadSignature(format!("message {}: {e}", msg.cid()))
            })?;
        }

        self.validated.lock().insert(*block.cid(), ());
        Ok(())
    }
}

/// Checks optional values and limits in the header.
fn block_sanity_checks(block: &Block) -> Result<(), BlockValidationError> {
    let header = block.header();
    if header.signature.is_none() {
        return Err(BlockValidationError::Malformed(
            "Block must have a signature".into(),
        ));
    }
    if header.ticket.is_none() {
        return Err(BlockValidationError::Malformed(
            "Block must have a ticket".into(),
        ));
    }
    if block.messages().len() > BLOCK_MESSAGE_LIMIT {
        return Err(BlockValidationError::Malformed(format!(
            "block contains {} messages, limit is {BLOCK_MESSAGE_LIMIT}",
            block.messages().len()
        )));
    }
    Ok(())
}

/// What the message pool knows about a sender when a message arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolView {
    /// Sender sequence in the committed state of the pool head.
    pub committed_sequence: u64,
    /// First missing sequence after the contiguous pending run that starts
    /// at `committed_sequence`.
    pub next_sequence: u64,
    /// Sender balance in the committed state of the pool head.
    pub balance: TokenAmount,
    /// Required funds of the other pending messages of the sender. A
    /// replaced message is left out.
    pub pending_funds: TokenAmount,
}

/// Admission checks for pending messages. Signature results are cached by
/// message CID.
pub struct MessageValidator {
    sig_cache: Mutex<LruCache<Cid, ()>>,
}

impl MessageValidator {
    pub fn new(cache_size: NonZeroUsize) -> Self {
        Self {
            sig_cache: Mutex::new(LruCache::new(cache_size.get())),
        }
    }

    /// Verifies the message signature, or finds it in the cache.
    pub fn check_signature(&self, msg: &SignedMessage) -> Result<(), MessageValidationError> {
        let cid = msg.cid();
        if self.sig_cache.lock().contains_key(&cid) {
            LRU_CACHE_HIT.get_or_create(&values::MESSAGE_SIGNATURE).inc();
            return Ok(());
        }
        LRU_CACHE_MISS.get_or_create(&values::MESSAGE_SIGNATURE).inc();
        msg.verify()
            .map_err(|e| MessageValidationError::BadSignature(e.to_string()))?;
        self.sig_cache.lock().insert(cid, ());
        Ok(())
    }

    pub fn validate_message(
        &self,
        msg: &SignedMessage,
        view: &PoolView,
    ) -> Result<(), MessageValidationError> {
        self.check_signature(msg)?;
        let sequence = msg.sequence();
        if sequence < view.committed_sequence {
            return Err(MessageValidationError::NonceTooLow {
                expected: view.committed_sequence,
                actual: sequence,
            });
        }
        if sequence > view.next_sequence {
            return Err(MessageValidationError::NonceGap {
                expected: view.next_sequence,
                actual: sequence,
            });
        }
        let required = view.pending_funds.saturating_add(msg.required_funds());
        if required > view.balance {
            return Err(MessageValidationError::InsufficientFunds {
                required,
                balance: view.balance,
            });
        }
        Ok(())
    }
}
