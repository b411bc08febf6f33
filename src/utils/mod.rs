// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cid;
pub mod db;
pub mod encoding;

use std::{pin::Pin, time::Duration};

use futures::{
    Future, FutureExt,
    future::{FusedFuture, pending},
    select,
};
use tokio::time::sleep;
use tracing::debug;

/// Keep running the future created by `make_fut` until the timeout or retry
/// limit in `args` is reached. The last error is returned once the retries
/// are used up.
/// `F` _must_ be cancel safe.
#[tracing::instrument(skip_all)]
pub async fn retry<F, T, E>(
    args: RetryArgs,
    mut make_fut: impl FnMut() -> F,
) -> Result<T, RetryError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut timeout: Pin<Box<dyn FusedFuture<Output = ()> + Send>> = match args.timeout {
        Some(duration) => Box::pin(sleep(duration).fuse()),
        None => Box::pin(pending()),
    };
    let max_retries = args.max_retries.unwrap_or(usize::MAX).max(1);
    let mut task = Box::pin(
        async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match make_fut().await {
                    Ok(ok) => return Ok(ok),
                    Err(err) if attempt >= max_retries => {
                        return Err(RetryError::RetriesExceeded(err));
                    }
                    Err(err) => debug!("retrying operation after {err:?}"),
                }
                if let Some(delay) = args.delay {
                    sleep(delay).await;
                }
            }
        }
        .fuse(),
    );
    select! {
        _ = timeout => Err(RetryError::TimeoutExceeded),
        res = task => res,
    }
}

#[derive(Debug, Clone, Copy, smart_default::SmartDefault)]
pub struct RetryArgs {
    #[default(Some(Duration::from_secs(1)))]
    pub timeout: Option<Duration>,
    #[default(Some(5))]
    pub max_retries: Option<usize>,
    #[default(Some(Duration::from_millis(200)))]
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E: std::fmt::Debug> {
    #[error("operation timed out")]
    TimeoutExceeded,
    #[error("retry limit exceeded, last error: {0:?}")]
    RetriesExceeded(E),
}
