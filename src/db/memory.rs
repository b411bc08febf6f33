// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::HashMap;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::RwLock;

use super::SettingsStore;

/// Block store and settings store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryDB {
    blockchain_db: RwLock<HashMap<Cid, Vec<u8>>>,
    settings_db: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDB {
    /// Number of blocks in the block store.
    pub fn len(&self) -> usize {
        self.blockchain_db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blockchain_db.read().is_empty()
    }
}

impl SettingsStore for MemoryDB {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.settings_db.read().get(key).cloned())
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.settings_db
            .write()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}

impl Blockstore for MemoryDB {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blockchain_db.read().get(k).cloned())
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockchain_db.write().insert(*k, block.to_vec());
        Ok(())
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(self.blockchain_db.read().contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SettingsStoreExt as _, setting_keys::HEAD_KEY};
    use crate::utils::db::CborStoreExt as _;

    #[test]
    fn settings_round_trip_json() {
        let db = MemoryDB::default();
        assert_eq!(db.read_obj::<Vec<String>>(HEAD_KEY).unwrap(), None);
        let head = vec![Cid::default().to_string()];
        db.write_obj(HEAD_KEY, &head).unwrap();
        assert_eq!(db.read_obj::<Vec<String>>(HEAD_KEY).unwrap(), Some(head));
        db.write_bin(HEAD_KEY, b"not json").unwrap();
        assert!(db.read_obj::<Vec<String>>(HEAD_KEY).is_err());
    }

    #[test]
    fn cbor_objects() {
        let db = MemoryDB::default();
        let cid = db.put_cbor_default(&(1u8, 2u64)).unwrap();
        assert!(db.has(&cid).unwrap());
        assert_eq!(db.get_cbor::<(u8, u64)>(&cid).unwrap(), Some((1, 2)));
        assert_eq!(db.len(), 1);
    }
}
