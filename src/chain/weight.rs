// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num_bigint::BigInt;

use crate::blocks::Tipset;

/// Cumulative chain weight.
pub type Weight = BigInt;

/// Weight every block contributes regardless of its ticket. It exceeds the
/// ticket quality of any practical number of blocks, so a chain with more
/// blocks always outweighs one with fewer blocks.
pub const BLOCK_BASE_WEIGHT: u128 = 1 << 64;

/// Weight a tipset adds on top of its parent's weight.
pub fn weight_delta(ts: &Tipset) -> Weight {
    ts.block_headers()
        .iter()
        .map(|h| {
            let quality = h.ticket.as_ref().map_or(0, |t| t.quality());
            Weight::from(BLOCK_BASE_WEIGHT + u128::from(quality))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Tipset;
    use crate::test_utils::{KEYS, TestChain};

    #[test]
    fn more_blocks_weigh_more() {
        let chain = TestChain::new();
        let genesis = chain.genesis_tipset();
        let a = chain.block_on(&genesis, &KEYS[0], vec![]);
        let b = chain.block_on(&genesis, &KEYS[1], vec![]);
        let single_a = Tipset::from(a.header.clone());
        let single_b = Tipset::from(b.header.clone());
        let both = Tipset::new([a.header, b.header]).unwrap();
        assert_eq!(
            weight_delta(&both),
            weight_delta(&single_a) + weight_delta(&single_b)
        );
        assert!(weight_delta(&both) > weight_delta(&single_a));
        assert!(weight_delta(&both) > weight_delta(&single_b));
    }

    #[test]
    fn genesis_delta_is_base_weight() {
        let chain = TestChain::new();
        assert_eq!(
            weight_delta(&chain.genesis_tipset().to_tipset()),
            Weight::from(BLOCK_BASE_WEIGHT)
        );
    }
}
