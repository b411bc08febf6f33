// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context as _;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Serialize, de::DeserializeOwned};

use super::cid::CidCborExt as _;

/// Typed `dag-cbor` access on top of any [`Blockstore`].
pub trait CborStoreExt: Blockstore {
    /// Encodes `obj` and writes it under its blake2b-256 CID.
    fn put_cbor_default<S: Serialize>(&self, obj: &S) -> anyhow::Result<Cid> {
        let bytes = fvm_ipld_encoding::to_vec(obj)?;
        let cid = Cid::from_cbor_blake2b256(obj)?;
        self.put_keyed(&cid, &bytes)?;
        Ok(cid)
    }

    fn get_cbor<T: DeserializeOwned>(&self, cid: &Cid) -> anyhow::Result<Option<T>> {
        match self.get(cid)? {
            Some(bytes) => Ok(Some(fvm_ipld_encoding::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_cbor_required<T: DeserializeOwned>(&self, cid: &Cid) -> anyhow::Result<T> {
        self.get_cbor(cid)?
            .with_context(|| format!("object {cid} not found in the block store"))
    }
}

impl<T: Blockstore + ?Sized> CborStoreExt for T {}
