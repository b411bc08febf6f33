// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::LazyLock;

use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

pub static MPOOL_MESSAGE_TOTAL: LazyLock<Gauge> = LazyLock::new(|| {
    let metric = Gauge::default();
    crate::metrics::default_registry().register(
        "mpool_message_total",
        "Total number of messages in the message pool",
        metric.clone(),
    );
    metric
});
pub static MPOOL_EVICTED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    crate::metrics::default_registry().register(
        "mpool_evicted_total",
        "Total number of messages evicted from a full message pool",
        metric.clone(),
    );
    metric
});
