// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::blocks::{ChainEpoch, Tipset};

/// Stage of a single sync request.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, strum::Display, strum::EnumString)]
pub enum SyncStage {
    /// Accepted, nothing fetched yet.
    #[default]
    #[strum(to_string = "requested")]
    Requested,
    /// Walking back from the target until a known ancestor is found.
    #[strum(to_string = "fetching ancestors")]
    FetchingAncestors,
    /// Validating blocks and applying messages, oldest first.
    #[strum(to_string = "validating")]
    Validating,
    /// Inserting the validated tipsets and running fork choice.
    #[strum(to_string = "applying")]
    Applying,
    #[strum(to_string = "committed")]
    Committed,
    #[strum(to_string = "rejected")]
    Rejected,
    #[strum(to_string = "abandoned")]
    Abandoned,
}

impl SyncStage {
    /// Whether the request is over.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Committed | Self::Rejected | Self::Abandoned)
    }
}

/// Progress of a sync request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncState {
    base: Option<Arc<Tipset>>,
    target: Option<Arc<Tipset>>,

    stage: SyncStage,
    epoch: ChainEpoch,

    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    message: String,
}

impl SyncState {
    /// Initializes the syncing state with base and target tipsets and sets
    /// start time.
    pub fn init(&mut self, base: Arc<Tipset>, target: Arc<Tipset>) {
        *self = Self {
            epoch: base.epoch(),
            target: Some(target),
            base: Some(base),
            start: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    pub fn target(&self) -> Option<&Arc<Tipset>> {
        self.target.as_ref()
    }

    /// Head of the chain when the request started.
    pub fn base(&self) -> Option<&Arc<Tipset>> {
        self.base.as_ref()
    }

    /// Epoch of the last tipset worked on.
    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the elapsed time of the current syncing process.
    /// Returns `None` if syncing has not started
    pub fn get_elapsed_time(&self) -> Option<Duration> {
        let start = self.start?;
        Some(self.end.unwrap_or_else(Utc::now) - start)
    }

    /// Sets the sync stage. Final stages stop the timer.
    pub fn set_stage(&mut self, stage: SyncStage) {
        if stage.is_final() {
            self.end = Some(Utc::now());
        }
        self.stage = stage;
    }

    pub fn set_epoch(&mut self, epoch: ChainEpoch) {
        self.epoch = epoch;
    }

    /// Records the failure of the request.
    pub fn error(&mut self, err: String, stage: SyncStage) {
        self.message = err;
        self.set_stage(stage);
    }
}
