// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

mod block;
mod header;
mod ticket;
mod tipset;

pub use block::{BLOCK_MESSAGE_LIMIT, Block, TxMeta, compute_msg_root};
pub use header::{BlockHeader, RawBlockHeader};
pub use ticket::{Ticket, ticket_input};
pub use tipset::{CreateTipsetError, FullTipset, Tipset, TipsetKey};

/// Epoch (height) of a block.
pub type ChainEpoch = i64;

/// Blockchain blocks error
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Tipset contains invalid data, as described by the string parameter.
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
    /// The given tipset has no blocks
    #[error("No blocks for tipset")]
    NoBlocks,
    /// Invalid signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// Error in validating arbitrary data
    #[error("Error validating data: {0}")]
    Validation(String),
}

impl From<CreateTipsetError> for Error {
    fn from(e: CreateTipsetError) -> Self {
        match e {
            CreateTipsetError::Empty => Error::NoBlocks,
            other => Error::InvalidTipset(other.to_string()),
        }
    }
}
