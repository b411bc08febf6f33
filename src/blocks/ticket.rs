// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::tuple::*;

use super::{ChainEpoch, TipsetKey};
use crate::crypto::Signature;

/// A Ticket is a marker of a tick of the blockchain's clock. It is produced
/// by the miner signing [`ticket_input`] for the epoch it mines on, and it
/// grades the block for fork choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple, Hash)]
pub struct Ticket {
    pub vrfproof: Signature,
}

impl Ticket {
    pub fn new(vrfproof: Signature) -> Self {
        Self { vrfproof }
    }

    /// Ticket quality: a lower proof digest is a better ticket.
    pub fn quality(&self) -> u32 {
        let digest = self.vrfproof.digest();
        let mut head = [0u8; 4];
        head.copy_from_slice(&digest[..4]);
        !u32::from_be_bytes(head)
    }
}

/// Bytes a miner signs to produce the ticket of a block mined on `parents`
/// at `epoch`.
pub fn ticket_input(parents: &TipsetKey, epoch: ChainEpoch) -> Vec<u8> {
    let mut input = Vec::with_capacity(parents.len() * 40 + 8);
    for cid in parents.iter() {
        input.extend(cid.to_bytes());
    }
    input.extend(epoch.to_be_bytes());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn ticket_input_depends_on_epoch() {
        let parents = TipsetKey::default();
        assert_ne!(ticket_input(&parents, 1), ticket_input(&parents, 2));
    }

    #[test]
    fn quality_is_stable() {
        let key = KeyPair::from_seed(b"miner").unwrap();
        let input = ticket_input(&TipsetKey::default(), 7);
        let a = Ticket::new(key.sign(&input));
        let b = Ticket::new(key.sign(&input));
        // RFC 6979 signatures are deterministic
        assert_eq!(a.quality(), b.quality());
    }
}
