// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::{RawBytes, to_vec, tuple::*};

use super::{Message as MessageTrait, TokenAmount, UnsignedMessage};
use crate::crypto::{self, Address, KeyPair, Signature};
use crate::utils::cid::CidCborExt as _;

/// Represents a wrapped message with signature bytes.
#[derive(PartialEq, Clone, Debug, Serialize_tuple, Deserialize_tuple, Hash, Eq)]
pub struct SignedMessage {
    pub message: UnsignedMessage,
    pub signature: Signature,
}

impl SignedMessage {
    /// Generate a new signed message from fields.
    /// The signature will be verified.
    pub fn new_from_parts(
        message: UnsignedMessage,
        signature: Signature,
    ) -> Result<SignedMessage, crypto::Error> {
        signature.verify(&message.cid().to_bytes(), &message.from)?;
        Ok(SignedMessage { message, signature })
    }

    /// Generate a new signed message from fields.
    /// The signature will not be verified.
    pub fn new_unchecked(message: UnsignedMessage, signature: Signature) -> SignedMessage {
        SignedMessage { message, signature }
    }

    /// Signs `message` with `key`, which must own the `from` address.
    pub fn sign(message: UnsignedMessage, key: &KeyPair) -> Result<SignedMessage, crypto::Error> {
        let signature = key.sign(&message.cid().to_bytes());
        Self::new_from_parts(message, signature)
    }

    /// Returns reference to the unsigned message.
    pub fn message(&self) -> &UnsignedMessage {
        &self.message
    }

    /// Returns signature of the signed message.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Verifies that the from address of the message generated the signature.
    pub fn verify(&self) -> Result<(), crypto::Error> {
        self.signature
            .verify(&self.message.cid().to_bytes(), &self.message.from)
    }

    pub fn cid(&self) -> Cid {
        Cid::from_cbor_blake2b256(self).expect("message serialization is infallible")
    }

    /// Returns the length of the chain message in bytes.
    pub fn chain_length(&self) -> usize {
        to_vec(self).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

impl MessageTrait for SignedMessage {
    fn from(&self) -> Address {
        self.message.from()
    }
    fn to(&self) -> Address {
        self.message.to()
    }
    fn sequence(&self) -> u64 {
        self.message.sequence()
    }
    fn value(&self) -> TokenAmount {
        self.message.value()
    }
    fn params(&self) -> &RawBytes {
        self.message.params()
    }
    fn gas_limit(&self) -> u64 {
        self.message.gas_limit()
    }
    fn gas_premium(&self) -> TokenAmount {
        self.message.gas_premium()
    }
    fn required_funds(&self) -> TokenAmount {
        self.message.required_funds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: &KeyPair, sequence: u64) -> UnsignedMessage {
        UnsignedMessage {
            from: from.address(),
            to: Address::default(),
            sequence,
            value: 5,
            gas_limit: 1,
            gas_premium: 1,
            params: RawBytes::default(),
        }
    }

    #[test]
    fn signed_message_verifies() {
        let key = KeyPair::from_seed(b"sender").unwrap();
        let smsg = SignedMessage::sign(transfer(&key, 0), &key).unwrap();
        smsg.verify().unwrap();
        assert_ne!(smsg.cid(), smsg.message.cid());
        assert!(smsg.chain_length() > 0);
    }

    #[test]
    fn tampered_message_fails_verification() {
        let key = KeyPair::from_seed(b"sender").unwrap();
        let mut smsg = SignedMessage::sign(transfer(&key, 0), &key).unwrap();
        smsg.message.value = 6;
        assert_eq!(smsg.verify(), Err(crypto::Error::VerificationFailed));
    }

    #[test]
    fn foreign_key_cannot_sign() {
        let key = KeyPair::from_seed(b"sender").unwrap();
        let other = KeyPair::from_seed(b"other").unwrap();
        assert!(SignedMessage::sign(transfer(&key, 0), &other).is_err());
    }
}
