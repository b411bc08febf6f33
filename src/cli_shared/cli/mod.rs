// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod config;

use std::path::PathBuf;

use clap::Parser;

pub use self::config::{
    Config, LogConfig, LogLevelFilter, LogValue, MiningConfig, TokioConfig,
};
use crate::cli_shared::read_config;

/// CLI options
#[derive(Default, Debug, Parser)]
pub struct CliOpts {
    /// A TOML file containing relevant configurations
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Produce blocks locally, overriding `mining.enabled`
    #[arg(long)]
    pub mine: bool,
    /// Directory for hourly rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Exit after parsing the configuration
    #[arg(long)]
    pub dry_run: bool,
}

impl CliOpts {
    /// Reads the configuration file, if any, and applies the command line
    /// overrides on top of it.
    pub fn to_config(&self) -> anyhow::Result<(Config, Option<PathBuf>)> {
        let (path, mut cfg) = read_config(self.config.as_ref())?;
        if self.mine {
            cfg.mining.enabled = true;
        }
        Ok((cfg, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mine_flag_overrides_config() {
        let opts = CliOpts::parse_from(["tipchain", "--mine", "--dry-run"]);
        let (cfg, path) = opts.to_config().unwrap();
        assert!(path.is_none());
        assert!(cfg.mining.enabled);
        assert!(opts.dry_run);
    }
}
