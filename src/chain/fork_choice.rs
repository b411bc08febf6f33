// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Heaviest-chain selection.

use std::cmp::Ordering;

use super::Weight;
use crate::blocks::TipsetKey;

/// Orders two candidates by preference: heavier wins, and on an exact weight
/// tie the lexicographically smaller key wins.
pub fn compare(a: (&TipsetKey, &Weight), b: (&TipsetKey, &Weight)) -> Ordering {
    a.1.cmp(b.1).then_with(|| b.0.cmp(a.0))
}

/// Picks the preferred candidate. The result depends only on the set of
/// candidates, not on the order they are given in.
pub fn select<'a>(
    candidates: impl IntoIterator<Item = (&'a TipsetKey, &'a Weight)>,
) -> Option<TipsetKey> {
    candidates
        .into_iter()
        .max_by(|a, b| compare(*a, *b))
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cid::CidCborExt as _;
    use cid::Cid;
    use quickcheck_macros::quickcheck;

    fn key(seed: u8) -> TipsetKey {
        TipsetKey::new([Cid::from_cbor_blake2b256(&seed).unwrap()])
    }

    #[test]
    fn heaviest_wins() {
        let (a, b) = (key(1), key(2));
        let (light, heavy) = (Weight::from(1), Weight::from(2));
        assert_eq!(select([(&a, &heavy), (&b, &light)]), Some(a.clone()));
        assert_eq!(select([(&a, &light), (&b, &heavy)]), Some(b));
    }

    #[test]
    fn tie_goes_to_smaller_key() {
        let (a, b) = (key(1), key(2));
        let w = Weight::from(7);
        let smaller = std::cmp::min(a.clone(), b.clone());
        assert_eq!(select([(&a, &w), (&b, &w)]), Some(smaller.clone()));
        assert_eq!(select([(&b, &w), (&a, &w)]), Some(smaller));
    }

    #[test]
    fn empty() {
        assert_eq!(select([]), None);
    }

    #[quickcheck]
    fn order_independent(candidates: Vec<(u8, u8)>, rotation: usize) -> bool {
        let owned: Vec<(TipsetKey, Weight)> = candidates
            .iter()
            .map(|(k, w)| (key(*k), Weight::from(*w % 4)))
            .collect();
        let mut rotated = owned.clone();
        if !rotated.is_empty() {
            let mid = rotation % rotated.len();
            rotated.rotate_left(mid);
        }
        let mut reversed = owned.clone();
        reversed.reverse();
        let expected = select(owned.iter().map(|(k, w)| (k, w)));
        expected == select(rotated.iter().map(|(k, w)| (k, w)))
            && expected == select(reversed.iter().map(|(k, w)| (k, w)))
    }
}
