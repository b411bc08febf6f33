// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use crate::chain_sync::MessageValidationError;
use crate::crypto::Address;
use crate::message::TokenAmount;

/// `MessagePool` error.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Error indicating message that's too large
    #[error("Message is too big")]
    MessageTooBig,
    #[error("Invalid message: {0}")]
    Invalid(#[from] MessageValidationError),
    #[error("Gas premium {premium} too low to replace pending message, need at least {minimum}")]
    ReplaceByFeeTooLow {
        premium: TokenAmount,
        minimum: TokenAmount,
    },
    #[error("Too many pending messages from actor {0}")]
    TooManyPendingMessages(Address),
    #[error("Message pool is full")]
    PoolFull,
    #[error("Failed to decode message: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(format!("{e:#}"))
    }
}

impl From<fvm_ipld_encoding::Error> for Error {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
