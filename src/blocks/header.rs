// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ops::Deref;
use std::sync::OnceLock;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use serde::{Deserialize, Serialize};

use super::{ChainEpoch, Error, Ticket, TipsetKey};
use crate::crypto::{Address, Signature};
use crate::utils::{cid::CidCborExt as _, db::CborStoreExt as _};

#[derive(Deserialize_tuple, Serialize_tuple, Clone, Hash, Eq, PartialEq, Debug)]
pub struct RawBlockHeader {
    /// Address of the miner actor that mined this block
    pub miner: Address,
    pub ticket: Option<Ticket>,
    /// The set of parents this block was based on.
    /// Typically one, but can be several in the case where there were
    /// multiple winning ticket-holders for an epoch
    pub parents: TipsetKey,
    /// The epoch at which this block was mined
    pub epoch: ChainEpoch,
    /// State root resulting from applying the messages of the parent tipset
    pub state_root: Cid,
    /// Commitment to the messages included in this block
    pub messages: Cid,
    /// Block creation time, in seconds since the Unix epoch
    pub timestamp: u64,
    pub signature: Option<Signature>,
}

impl RawBlockHeader {
    pub fn cid(&self) -> Cid {
        Cid::from_cbor_blake2b256(self).expect("block serialization cannot fail")
    }

    /// Check to ensure block signature is valid
    pub fn check_block_signature(&self, addr: &Address) -> Result<(), Error> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::InvalidSignature("Signature is nil in header".to_owned()))?;

        signature
            .verify(&self.to_signing_bytes(), addr)
            .map_err(|e| Error::InvalidSignature(format!("Block signature invalid: {e}")))?;

        Ok(())
    }

    /// Serialize the block header without the signature.
    pub fn to_signing_bytes(&self) -> Vec<u8> {
        let mut blk = self.clone();
        blk.signature = None;
        fvm_ipld_encoding::to_vec(&blk).expect("block serialization cannot fail")
    }
}

/// A [`RawBlockHeader`] which caches its CID.
#[derive(Debug)]
pub struct BlockHeader {
    uncached: RawBlockHeader,
    cid: OnceLock<Cid>,
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.uncached == other.uncached
    }
}

impl Eq for BlockHeader {}

impl Clone for BlockHeader {
    fn clone(&self) -> Self {
        Self {
            uncached: self.uncached.clone(),
            cid: self.cid.clone(),
        }
    }
}

impl Deref for BlockHeader {
    type Target = RawBlockHeader;

    fn deref(&self) -> &Self::Target {
        &self.uncached
    }
}

impl From<RawBlockHeader> for BlockHeader {
    fn from(uncached: RawBlockHeader) -> Self {
        Self::new(uncached)
    }
}

impl BlockHeader {
    pub fn new(uncached: RawBlockHeader) -> Self {
        Self {
            uncached,
            cid: OnceLock::new(),
        }
    }

    pub fn load(store: &impl Blockstore, cid: Cid) -> anyhow::Result<Option<Self>> {
        if let Some(uncached) = store.get_cbor::<RawBlockHeader>(&cid)? {
            let cid_cell = OnceLock::new();
            let _ = cid_cell.set(cid);
            Ok(Some(Self {
                uncached,
                cid: cid_cell,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn cid(&self) -> &Cid {
        self.cid.get_or_init(|| self.uncached.cid())
    }

    pub fn into_raw(self) -> RawBlockHeader {
        self.uncached
    }
}

impl Serialize for BlockHeader {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.uncached.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawBlockHeader::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::db::MemoryDB;
    use crate::utils::db::CborStoreExt as _;

    fn header(miner: &KeyPair) -> RawBlockHeader {
        RawBlockHeader {
            miner: miner.address(),
            ticket: None,
            parents: TipsetKey::default(),
            epoch: 1,
            state_root: Cid::default(),
            messages: Cid::default(),
            timestamp: 42,
            signature: None,
        }
    }

    #[test]
    fn signature_covers_header_fields() {
        let miner = KeyPair::from_seed(b"miner").unwrap();
        let mut raw = header(&miner);
        raw.signature = Some(miner.sign(&raw.to_signing_bytes()));
        raw.check_block_signature(&miner.address()).unwrap();

        raw.timestamp += 1;
        assert!(matches!(
            raw.check_block_signature(&miner.address()),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn missing_signature() {
        let miner = KeyPair::from_seed(b"miner").unwrap();
        assert!(header(&miner).check_block_signature(&miner.address()).is_err());
    }

    #[test]
    fn load_keeps_cid() {
        let db = MemoryDB::default();
        let miner = KeyPair::from_seed(b"miner").unwrap();
        let raw = header(&miner);
        let cid = db.put_cbor_default(&raw).unwrap();
        let loaded = BlockHeader::load(&db, cid).unwrap().unwrap();
        assert_eq!(loaded.cid(), &cid);
        assert_eq!(*loaded.cid(), raw.cid());
    }
}
