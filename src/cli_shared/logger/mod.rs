// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use crate::cli_shared::cli::{CliOpts, LogConfig};

pub fn setup_logger(opts: &CliOpts, log: &LogConfig) {
    let mut layers: Vec<Box<dyn tracing_subscriber::layer::Layer<Registry> + Send + Sync>> =
        // console logger
        vec![Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_filter(get_env_filter(default_env_filter(log))),
        )];

    // file logger
    if let Some(log_dir) = &opts.log_dir {
        let file_appender = tracing_appender::rolling::hourly(log_dir, "tipchain.log");
        layers.push(Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(file_appender)
                .with_filter(get_env_filter(default_env_filter(log))),
        ));
    }

    tracing_subscriber::registry().with(layers).init();
}

/// Returns an [`EnvFilter`] according to the `RUST_LOG` environment variable,
/// or `def` when it is unset.
fn get_env_filter(def: EnvFilter) -> EnvFilter {
    use std::env::{
        self,
        VarError::{NotPresent, NotUnicode},
    };
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(s) => EnvFilter::new(s),
        Err(NotPresent) => def,
        Err(NotUnicode(_)) => EnvFilter::default(),
    }
}

fn default_env_filter(log: &LogConfig) -> EnvFilter {
    let mut directives = "info".to_owned();
    let configured = log.to_filter_string();
    if !configured.is_empty() {
        directives.push(',');
        directives.push_str(&configured);
    }
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("invalid log filters {directives}: {e}");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;
    use crate::cli_shared::cli::{LogLevelFilter, LogValue};

    #[test]
    fn configured_filters_extend_the_default() {
        let log = LogConfig {
            filters: vec![LogValue::new(
                "tipchain::chain_sync",
                LogLevelFilter(LevelFilter::TRACE),
            )],
        };
        let filter = default_env_filter(&log).to_string();
        assert!(filter.contains("tipchain::chain_sync=trace"), "{filter}");
        assert!(filter.contains("info"), "{filter}");
    }

    #[test]
    fn empty_config_logs_info() {
        let filter = default_env_filter(&LogConfig { filters: vec![] });
        assert_eq!(filter.to_string(), "info");
    }
}
