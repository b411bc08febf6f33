// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::db::{SettingsStore, SettingsStoreExt as _, setting_keys::MPOOL_CONFIG_KEY};

const SIZE_LIMIT: usize = 50_000;
const MAX_ACTOR_PENDING_MESSAGES: usize = 1000;
const MAX_MESSAGE_SIZE: usize = 64 << 10;
const SIG_VAL_CACHE_SIZE: NonZeroUsize = nonzero!(32000usize);

/// Config available for the [`super::MessagePool`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct MpoolConfig {
    /// Total number of pending messages the pool holds before evicting.
    #[default(SIZE_LIMIT)]
    pub size_limit: usize,
    #[default(MAX_ACTOR_PENDING_MESSAGES)]
    pub max_actor_pending_messages: usize,
    /// Minimum premium increase, in percent, for a replacement. Zero means
    /// any strict increase is accepted.
    pub replace_by_fee_bump_percent: u64,
    /// Maximum size of a serialized message in bytes.
    #[default(MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    #[default(SIG_VAL_CACHE_SIZE)]
    pub sig_cache_size: NonZeroUsize,
}

impl MpoolConfig {
    /// Loads the configuration stored under [`MPOOL_CONFIG_KEY`], falling back
    /// to the default configuration.
    pub fn load_config<DB: SettingsStore + ?Sized>(store: &DB) -> anyhow::Result<Self> {
        Ok(store.read_obj(MPOOL_CONFIG_KEY)?.unwrap_or_default())
    }

    pub fn save_config<DB: SettingsStore + ?Sized>(&self, store: &DB) -> anyhow::Result<()> {
        store.write_obj(MPOOL_CONFIG_KEY, self)
    }

    /// Smallest premium that replaces a pending message paying `premium`.
    pub fn replacement_premium(&self, premium: u64) -> u64 {
        let bump = premium.saturating_mul(self.replace_by_fee_bump_percent) / 100;
        premium.saturating_add(bump).saturating_add(1)
    }
}
