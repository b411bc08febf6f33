// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cli;
pub mod logger;

use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli_shared::cli::Config;

/// Reads the TOML configuration at `config_path_opt`, or returns the default
/// configuration when no path is given.
pub fn read_config(
    config_path_opt: Option<&PathBuf>,
) -> anyhow::Result<(Option<PathBuf>, Config)> {
    match config_path_opt {
        Some(path) => {
            // Read from config file
            let toml = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            // Parse and return the configuration file
            let config = toml::from_str(&toml)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            Ok((Some(path.clone()), config))
        }
        None => Ok((None, Config::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_config_default() {
        let (config_path, config) = read_config(None).unwrap();

        assert!(config_path.is_none());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn read_config_with_path() {
        let mut default_config = Config::default();
        default_config.sync.max_depth = 42;
        default_config.mpool.replace_by_fee_bump_percent = 25;
        let path = std::env::temp_dir().join(format!("tipchain-config-{}.toml", std::process::id()));
        let serialized_config = toml::to_string(&default_config).unwrap();
        std::fs::write(&path, serialized_config).unwrap();

        let (config_path, config) = read_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config_path.unwrap(), path);
        assert_eq!(config, default_config);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            max_depth = 10

            [chain]
            timestamp = 5
            accounts = [{ address = "f1000102030405060708090a0b0c0d0e0f10111213", balance = 7 }]
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.max_depth, 10);
        assert_eq!(config.sync.fetch_retries, 3);
        assert_eq!(config.chain.timestamp, 5);
        assert_eq!(config.chain.balances().unwrap().len(), 1);
        assert_eq!(config.mpool, Default::default());
    }
}
