// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Account keys, addresses and signatures.
//!
//! Accounts are secp256k1 keys. An [`Address`] is the 20 byte BLAKE2b digest
//! of the compressed SEC1 public key, and a [`Signature`] carries the public
//! key so that verification only needs the expected address.

use std::{fmt, str::FromStr};

use fvm_ipld_encoding::{
    BytesDe, BytesSer, strict_bytes,
    tuple::{Deserialize_tuple, Serialize_tuple, serde_tuple},
};
use k256::ecdsa::{
    Signature as EcdsaSignature, SigningKey, VerifyingKey,
    signature::{Signer as _, Verifier as _},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

use crate::utils::encoding::{blake2b_160, blake2b_256};

pub const ADDRESS_LENGTH: usize = 20;
const ADDRESS_PREFIX: &str = "f1";

/// Crypto errors
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid secret key: {0}")]
    InvalidKey(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signer {actual} does not match expected address {expected}")]
    AddressMismatch { expected: Address, actual: Address },
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Account address derived from a public key.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(blake2b_160(public_key))
    }

    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ADDRESS_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| Error::InvalidAddress(format!("missing {ADDRESS_PREFIX} prefix")))?;
        let mut bytes = [0u8; ADDRESS_LENGTH];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BytesSer(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let BytesDe(bytes) = BytesDe::deserialize(deserializer)?;
        let bytes: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| de::Error::custom(format!("invalid address length {}", b.len())))?;
        Ok(Self(bytes))
    }
}

/// A secp256k1 signature together with the signer's compressed public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize_tuple, Deserialize_tuple)]
pub struct Signature {
    #[serde(with = "strict_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "strict_bytes")]
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Address of the key that produced this signature.
    pub fn signer(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    /// Checks that the signature over `data` was produced by `addr`.
    pub fn verify(&self, data: &[u8], addr: &Address) -> Result<(), Error> {
        let actual = self.signer();
        if actual != *addr {
            return Err(Error::AddressMismatch {
                expected: *addr,
                actual,
            });
        }
        let key = VerifyingKey::from_sec1_bytes(&self.public_key)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        let sig = EcdsaSignature::from_slice(&self.bytes)
            .map_err(|e| Error::MalformedSignature(e.to_string()))?;
        key.verify(data, &sig)
            .map_err(|_| Error::VerificationFailed)
    }

    /// BLAKE2b digest of the signature bytes, used to grade tickets.
    pub fn digest(&self) -> [u8; 32] {
        blake2b_256(&self.bytes)
    }
}

/// Secret key with its derived address.
#[derive(Clone)]
pub struct KeyPair {
    secret: SigningKey,
    public_key: Vec<u8>,
    address: Address,
}

impl KeyPair {
    pub fn from_secret(secret: &[u8]) -> Result<Self, Error> {
        let secret = SigningKey::from_slice(secret).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let public_key = secret.verifying_key().to_sec1_bytes().to_vec();
        let address = Address::from_public_key(&public_key);
        Ok(Self {
            secret,
            public_key,
            address,
        })
    }

    /// Deterministic key derived from an arbitrary seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, Error> {
        Self::from_secret(&blake2b_256(seed))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.secret.sign(data);
        Signature {
            public_key: self.public_key.clone(),
            bytes: sig.to_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
