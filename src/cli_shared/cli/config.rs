// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use smart_default::SmartDefault;
use tracing_subscriber::filter::LevelFilter;

use crate::chain_sync::SyncConfig;
use crate::genesis::GenesisConfig;
use crate::message_pool::MpoolConfig;

/// A [`LevelFilter`] written in configuration files by name, case
/// insensitive.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct LogLevelFilter(pub LevelFilter);

impl fmt::Display for LogLevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for LogLevelFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LogLevelFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LevelFilter::from_str(&s)
            .map(LogLevelFilter)
            .map_err(|_| D::Error::custom(format!("unknown log level filter {s}")))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct LogConfig {
    pub filters: Vec<LogValue>,
}

impl LogConfig {
    pub(in crate::cli_shared) fn to_filter_string(&self) -> String {
        self.filters
            .iter()
            .map(|f| format!("{}={}", f.module, f.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filters: vec![
                LogValue::new("tipchain::chain_sync", LogLevelFilter(LevelFilter::INFO)),
                LogValue::new("tipchain::message_pool", LogLevelFilter(LevelFilter::INFO)),
            ],
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct LogValue {
    pub module: String,
    pub level: LogLevelFilter,
}

impl LogValue {
    pub fn new(module: &str, level: LogLevelFilter) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Clone, Default, Debug)]
#[serde(default)]
pub struct TokioConfig {
    pub worker_threads: Option<usize>,
    pub max_blocking_threads: Option<usize>,
}

/// Local block production for development networks.
#[derive(Deserialize, Serialize, PartialEq, Eq, Clone, Debug, SmartDefault)]
#[serde(default)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Seed the miner key is derived from.
    #[default("tipchain-dev-miner".to_owned())]
    pub key_seed: String,
    #[default(30)]
    pub block_time_secs: u64,
    #[default(1000)]
    pub max_block_messages: usize,
    #[default(1 << 20)]
    pub max_block_size: usize,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Default, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub mpool: MpoolConfig,
    pub chain: GenesisConfig,
    pub mining: MiningConfig,
    pub log: LogConfig,
    pub tokio: TokioConfig,
}

#[cfg(test)]
mod test {
    use quickcheck::Arbitrary;
    use quickcheck_macros::quickcheck;
    use tracing_subscriber::EnvFilter;

    use super::*;

    #[derive(Clone, Debug)]
    struct ConfigPartial {
        sync: SyncConfig,
        mpool: MpoolConfig,
        mining: MiningConfig,
    }

    impl From<ConfigPartial> for Config {
        fn from(val: ConfigPartial) -> Self {
            Config {
                sync: val.sync,
                mpool: val.mpool,
                mining: val.mining,
                ..Default::default()
            }
        }
    }

    impl Arbitrary for ConfigPartial {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            ConfigPartial {
                sync: SyncConfig {
                    max_depth: u16::arbitrary(g) as usize,
                    fetch_retries: u8::arbitrary(g) as usize,
                    abandon_superseded: bool::arbitrary(g),
                    ..Default::default()
                },
                mpool: MpoolConfig {
                    size_limit: u32::arbitrary(g) as usize,
                    replace_by_fee_bump_percent: u8::arbitrary(g) as u64,
                    ..Default::default()
                },
                mining: MiningConfig {
                    enabled: bool::arbitrary(g),
                    key_seed: String::arbitrary(g),
                    ..Default::default()
                },
            }
        }
    }

    #[quickcheck]
    fn test_config_all_params_under_section(config: ConfigPartial) {
        let config = Config::from(config);
        let serialized_config =
            toml::to_string(&config).expect("could not serialize the configuration");
        assert_eq!(
            serialized_config
                .trim_start()
                .chars()
                .next()
                .expect("configuration empty"),
            '['
        );
        let parsed: Config = toml::from_str(&serialized_config).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_log_filters() {
        let config = LogConfig::default();
        EnvFilter::builder()
            .parse(config.to_filter_string())
            .unwrap();
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        let config: LogConfig =
            toml::from_str("filters = [{ module = \"tipchain\", level = \"Debug\" }]").unwrap();
        assert_eq!(config.filters[0].level, LogLevelFilter(LevelFilter::DEBUG));
        assert!(
            toml::from_str::<LogConfig>("filters = [{ module = \"x\", level = \"loud\" }]")
                .is_err()
        );
    }
}
