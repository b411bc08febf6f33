// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;

use super::BlockHeader;
use crate::message::SignedMessage;
use crate::utils::{cid::CidCborExt as _, db::CborStoreExt as _};

/// Limit of messages in a block.
pub const BLOCK_MESSAGE_LIMIT: usize = 10000;

/// A complete block: the header and the signed messages it includes, in
/// inclusion order. This is also the gossip form of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Block {
    pub header: BlockHeader,
    pub messages: Vec<SignedMessage>,
}

impl std::hash::Hash for Block {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self.cid(), state)
    }
}

impl Block {
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn messages(&self) -> &[SignedMessage] {
        &self.messages
    }

    /// Returns block header's CID.
    pub fn cid(&self) -> &Cid {
        self.header.cid()
    }

    /// Persists the header, the messages and the message list in the given
    /// block store.
    pub fn persist(&self, db: &impl Blockstore) -> anyhow::Result<()> {
        let mut cids = Vec::with_capacity(self.messages.len());
        for msg in &self.messages {
            cids.push(db.put_cbor_default(msg)?);
        }
        db.put_cbor_default(&TxMeta { messages: cids })?;
        db.put_cbor_default(&*self.header)?;
        Ok(())
    }

    /// Loads a previously persisted block. Returns `None` when the header
    /// is unknown.
    pub fn load(db: &impl Blockstore, cid: Cid) -> anyhow::Result<Option<Block>> {
        let Some(header) = BlockHeader::load(db, cid)? else {
            return Ok(None);
        };
        let meta: TxMeta = db.get_cbor_required(&header.messages)?;
        let messages = meta
            .messages
            .iter()
            .map(|c| db.get_cbor_required::<SignedMessage>(c))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(Block { header, messages }))
    }
}

/// The list of message CIDs a block header commits to.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, Default)]
pub struct TxMeta {
    pub messages: Vec<Cid>,
}

/// Computes the message root a header must carry for `messages`.
pub fn compute_msg_root(messages: &[SignedMessage]) -> Cid {
    let meta = TxMeta {
        messages: messages.iter().map(SignedMessage::cid).collect(),
    };
    Cid::from_cbor_blake2b256(&meta).expect("message root serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::test_utils::{KEYS, signed_transfer};
    use crate::utils::db::CborStoreExt as _;

    #[test]
    fn persist_and_load_block() {
        let db = MemoryDB::default();
        let genesis = crate::test_utils::TestChain::new().genesis_block();
        let msgs = vec![
            signed_transfer(&KEYS[0], 0, 1),
            signed_transfer(&KEYS[0], 1, 1),
        ];
        let mut raw = genesis.header.clone().into_raw();
        raw.messages = compute_msg_root(&msgs);
        let block = Block {
            header: raw.into(),
            messages: msgs,
        };
        block.persist(&db).unwrap();

        let loaded = Block::load(&db, *block.cid()).unwrap().unwrap();
        assert_eq!(loaded, block);
        let meta: TxMeta = db.get_cbor_required(&block.header.messages).unwrap();
        assert_eq!(meta.messages.len(), 2);
        assert!(Block::load(&db, Cid::default()).unwrap().is_none());
    }

    #[test]
    fn empty_message_root_is_stable() {
        assert_eq!(compute_msg_root(&[]), compute_msg_root(&[]));
        assert_ne!(
            compute_msg_root(&[]),
            compute_msg_root(&[signed_transfer(&KEYS[1], 0, 1)])
        );
    }
}
