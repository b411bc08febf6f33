// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{cmp::max, ffi::OsString, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use tokio::runtime::Builder as RuntimeBuilder;
use tracing::info;

use crate::cli_shared::{cli::CliOpts, logger};

/// CLI structure generated when interacting with the node binary
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), author = env!("CARGO_PKG_AUTHORS"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[clap(flatten)]
    pub opts: CliOpts,
}

pub fn main<ArgT>(args: impl IntoIterator<Item = ArgT>) -> anyhow::Result<()>
where
    ArgT: Into<OsString> + Clone,
{
    // Capture Cli inputs
    let Cli { opts } = Cli::parse_from(args);

    let (cfg, path) = opts.to_config().context("Error parsing config")?;

    logger::setup_logger(&opts, &cfg.log);

    match &path {
        Some(path) => info!("Config loaded: {}", path.display()),
        None => info!("Using default config"),
    }
    if opts.dry_run {
        return Ok(());
    }

    let mut builder = RuntimeBuilder::new_multi_thread();
    builder.enable_io().enable_time();

    if let Some(worker_threads) = cfg.tokio.worker_threads {
        builder.worker_threads(max(1, worker_threads));
    }
    if let Some(max_blocking_threads) = cfg.tokio.max_blocking_threads {
        builder.max_blocking_threads(max(1, max_blocking_threads));
    }

    let rt = builder.build()?;

    let ret = rt.block_on(super::start_interruptable(cfg));
    info!("Shutting down tokio...");
    rt.shutdown_timeout(Duration::from_secs_f32(0.5));
    info!("Node finished shutdown");
    ret
}
