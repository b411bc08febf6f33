// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod context;
pub mod main;
mod producer;

use std::sync::Arc;

use tokio::{signal::ctrl_c, sync::broadcast::error::RecvError, task::JoinSet};
use tracing::{debug, info, warn};

pub use self::producer::BlockProducer;
use crate::cli_shared::cli::Config;
use crate::daemon::context::AppContext;
use crate::message_pool::{MessagePool, MpoolChainProvider};
use crate::node_api::{ChainApi, NodeApi};

/// Starts the node and stops it on the first keyboard interrupt.
pub async fn start_interruptable(config: Config) -> anyhow::Result<()> {
    tokio::select! {
        ret = start(config) => ret,
        _ = ctrl_c() => {
            info!("Keyboard interrupt.");
            Ok(())
        }
    }
}

/// Bootstraps the chain engine and the message pool, then drives the node
/// services until one of them fails.
pub(super) async fn start(config: Config) -> anyhow::Result<()> {
    info!(
        "Starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    let ctx = AppContext::init(&config).await?;

    let mut services = JoinSet::new();
    let mpool = Arc::new(MessagePool::new(
        MpoolChainProvider::from_engine(&ctx.engine),
        ctx.mpool_config.clone(),
        &mut services,
    )?);
    let api = NodeApi::new(ctx.engine.clone(), mpool);

    services.spawn(log_head_changes(api.chain.clone()));

    if config.mining.enabled {
        let producer = BlockProducer::new(config.mining.clone(), api.mining.clone())?;
        services.spawn(producer.run());
    }

    // Exit on the first service error, or once every service is done.
    while let Some(ret) = services.join_next().await {
        ret??;
    }
    Ok(())
}

async fn log_head_changes(chain: Arc<dyn ChainApi>) -> anyhow::Result<()> {
    let mut head_changes = chain.subscribe_head_change();
    loop {
        match head_changes.recv().await {
            Ok(change) => {
                if change.dropped.is_empty() {
                    info!(
                        "Head at epoch {}: {}",
                        change.new_head.epoch(),
                        change.new_head.key()
                    );
                } else {
                    info!(
                        "Reorg to {} at epoch {}, {} tipsets dropped, {} adopted",
                        change.new_head.key(),
                        change.new_head.epoch(),
                        change.dropped.len(),
                        change.adopted.len()
                    );
                }
                if let Ok(metrics) = crate::metrics::encode_text() {
                    debug!("Metrics after head change:\n{metrics}");
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Head change log skipped {n} events, head is {}", chain.head().key())
            }
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}
