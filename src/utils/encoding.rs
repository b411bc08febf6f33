// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blake2b_simd::Params;

/// Generates BLAKE2b hash of fixed 32 bytes size.
pub fn blake2b_256(ingest: &[u8]) -> [u8; 32] {
    let digest = Params::new()
        .hash_length(32)
        .to_state()
        .update(ingest)
        .finalize();

    let mut ret = [0u8; 32];
    ret.clone_from_slice(digest.as_bytes());
    ret
}

/// Generates BLAKE2b hash of fixed 20 bytes size, used for account addresses.
pub fn blake2b_160(ingest: &[u8]) -> [u8; 20] {
    let digest = Params::new()
        .hash_length(20)
        .to_state()
        .update(ingest)
        .finalize();

    let mut ret = [0u8; 20];
    ret.clone_from_slice(digest.as_bytes());
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lengths() {
        assert_ne!(blake2b_256(b"tipchain"), [0; 32]);
        assert_ne!(blake2b_160(b"tipchain"), [0; 20]);
        assert_ne!(blake2b_256(b"tipchain")[..20], blake2b_160(b"tipchain"));
    }
}
