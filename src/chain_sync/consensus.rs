// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context as _;

use crate::blocks::{RawBlockHeader, ticket_input};

/// Verifies the proposer-election proof carried by a block header. The
/// engine only needs a yes or no answer.
pub trait ProofVerifier: Send + Sync {
    fn verify_ticket(&self, header: &RawBlockHeader) -> anyhow::Result<()>;
}

/// Accepts a ticket when it is the miner's signature over the parent key and
/// the block epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureTicketVerifier;

impl ProofVerifier for SignatureTicketVerifier {
    fn verify_ticket(&self, header: &RawBlockHeader) -> anyhow::Result<()> {
        let ticket = header.ticket.as_ref().context("block has no ticket")?;
        ticket
            .vrfproof
            .verify(&ticket_input(&header.parents, header.epoch), &header.miner)
            .context("ticket was not produced by the miner")?;
        Ok(())
    }
}
