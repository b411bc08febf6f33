// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use tracing::{info, warn};

use crate::blocks::Block;
use crate::chain_sync::{ChainEngine, OfflineFetcher, SignatureTicketVerifier};
use crate::cli_shared::cli::Config;
use crate::db::MemoryDB;
use crate::genesis::create_genesis;
use crate::interpreter::LedgerVm;
use crate::message_pool::MpoolConfig;

pub type DbType = MemoryDB;

/// Long lived node components shared by the daemon services.
pub struct AppContext {
    pub db: Arc<DbType>,
    pub genesis: Block,
    pub engine: Arc<ChainEngine<DbType>>,
    pub mpool_config: MpoolConfig,
}

impl AppContext {
    pub async fn init(cfg: &Config) -> anyhow::Result<AppContext> {
        let db = Arc::new(DbType::default());
        let genesis = create_genesis(db.as_ref(), &cfg.chain)?;
        let engine = Arc::new(ChainEngine::new(
            db.clone(),
            db.clone(),
            &genesis,
            Arc::new(LedgerVm::new(db.clone())),
            Arc::new(SignatureTicketVerifier),
            Arc::new(OfflineFetcher),
            cfg.sync.clone(),
        )?);
        if let Err(e) = engine.restore().await {
            warn!("Continuing from genesis: {e:#}");
        }
        let head = engine.head();
        info!("Chain head at epoch {}: {}", head.epoch(), head.key());
        let mpool_config = load_mpool_config(db.as_ref(), cfg)?;
        Ok(Self {
            db,
            genesis,
            engine,
            mpool_config,
        })
    }
}

/// A configuration persisted by an earlier run wins over the default, an
/// explicit configuration wins over both.
fn load_mpool_config(db: &DbType, cfg: &Config) -> anyhow::Result<MpoolConfig> {
    let config = if cfg.mpool == MpoolConfig::default() {
        MpoolConfig::load_config(db)?
    } else {
        cfg.mpool.clone()
    };
    config.save_config(db)?;
    Ok(config)
}
