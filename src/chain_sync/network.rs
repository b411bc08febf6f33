// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use async_trait::async_trait;
use cid::Cid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocks::Block;

/// Opaque identifier of the peer a block came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("block {0} not found")]
    NotFound(Cid),
    #[error("request for block {0} timed out")]
    Timeout(Cid),
    #[error("requested block {requested} but received {received}")]
    Mismatch { requested: Cid, received: Cid },
}

/// Retrieves blocks by CID from the network. `peer` is a hint: the peer that
/// announced the block being synced.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_block(&self, cid: Cid, peer: Option<PeerId>) -> Result<Block, FetchError>;
}

/// Fetcher for a node without peers: every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

#[async_trait]
impl BlockFetcher for OfflineFetcher {
    async fn fetch_block(&self, cid: Cid, _peer: Option<PeerId>) -> Result<Block, FetchError> {
        Err(FetchError::NotFound(cid))
    }
}
