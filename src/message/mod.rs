// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod signed_message;

use cid::Cid;
use fvm_ipld_encoding::{RawBytes, tuple::*};

use crate::crypto::Address;
use crate::utils::cid::CidCborExt as _;
pub use signed_message::SignedMessage;

/// Token amounts are plain integers of the smallest unit.
pub type TokenAmount = u64;

/// Message interface to interact with Signed and unsigned messages in a generic
/// context.
pub trait Message {
    /// Returns the from address of the message.
    fn from(&self) -> Address;
    /// Returns the destination address of the message.
    fn to(&self) -> Address;
    /// Returns the message sequence or nonce.
    fn sequence(&self) -> u64;
    /// Returns the amount sent in message.
    fn value(&self) -> TokenAmount;
    /// Returns the encoded parameters for the call.
    fn params(&self) -> &RawBytes;
    /// Returns the gas limit for the message.
    fn gas_limit(&self) -> u64;
    /// Returns the gas premium, which is the message priority in the pool.
    fn gas_premium(&self) -> TokenAmount;
    /// Returns the required funds for the message.
    fn required_funds(&self) -> TokenAmount;
}

/// Unsigned transfer message.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Default, Serialize_tuple, Deserialize_tuple)]
pub struct UnsignedMessage {
    pub from: Address,
    pub to: Address,
    pub sequence: u64,
    pub value: TokenAmount,
    pub gas_limit: u64,
    pub gas_premium: TokenAmount,
    pub params: RawBytes,
}

impl UnsignedMessage {
    /// Content identifier, the signed payload of [`SignedMessage`].
    pub fn cid(&self) -> Cid {
        Cid::from_cbor_blake2b256(self).expect("message serialization is infallible")
    }
}

impl Message for UnsignedMessage {
    fn from(&self) -> Address {
        self.from
    }
    fn to(&self) -> Address {
        self.to
    }
    fn sequence(&self) -> u64 {
        self.sequence
    }
    fn value(&self) -> TokenAmount {
        self.value
    }
    fn params(&self) -> &RawBytes {
        &self.params
    }
    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
    fn gas_premium(&self) -> TokenAmount {
        self.gas_premium
    }
    fn required_funds(&self) -> TokenAmount {
        self.gas_premium
            .saturating_mul(self.gas_limit)
            .saturating_add(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_funds_saturates() {
        let msg = UnsignedMessage {
            value: 10,
            gas_limit: 3,
            gas_premium: 4,
            ..Default::default()
        };
        assert_eq!(msg.required_funds(), 22);
        let huge = UnsignedMessage {
            value: 1,
            gas_limit: u64::MAX,
            gas_premium: 2,
            ..Default::default()
        };
        assert_eq!(huge.required_funds(), u64::MAX);
    }
}
