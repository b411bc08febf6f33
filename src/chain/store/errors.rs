// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use crate::blocks::{self, TipsetKey};

/// Chain error
#[derive(Debug, Error)]
pub enum Error {
    /// Key was not found
    #[error("Invalid tipset key: {0}")]
    UndefinedKey(TipsetKey),
    /// A tipset was inserted before its parent
    #[error("Parent {parent} of tipset {child} is not indexed")]
    MissingParent { parent: TipsetKey, child: TipsetKey },
    #[error(transparent)]
    Blocks(#[from] blocks::Error),
    #[error(transparent)]
    CreateTipset(#[from] blocks::CreateTipsetError),
    /// Error originating from the block store or the settings store
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
