use std::sync::Arc;

use anyhow::Result;
use beacon_api::TotalReward;
use chain_state::{
    ArrivalTimes, ChainState, ExecutionMetrics, HeadStreamState, ProposerInfo, SlotsOverview,
    ValidatorStatusSummary,
};
use data_feeds::{L2MetricsTracker, L2Summary, LabClient, SlotHistoryEntry};
use logging::{debug_with_slot, error_with_slot, info_with_slot, warn_with_slot};
use serde::Serialize;
use strum::AsRefStr;
use types::{
    primitives::{Epoch, Slot},
    slot::SlotStatus,
    validator_set::ValidatorSet,
};

/// Attestation rewards of an epoch are only final once the epoch after it has ended.
const REWARDS_DELAY_EPOCHS: Epoch = 2;

/// What caused a dashboard refresh.
#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "slot")]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Startup,
    Slot(Slot),
    Head(Slot),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct EpochMetrics {
    pub epoch: Epoch,
    pub validator_status: ValidatorStatusSummary,
    pub rewards_epoch: Option<Epoch>,
    /// Sum of the attestation rewards of the tracked validators in Gwei.
    pub attestation_rewards: Option<i64>,
}

/// Everything a renderer needs to draw one dashboard frame.
#[derive(Clone, Debug, Serialize)]
pub struct Frame {
    pub trigger: Trigger,
    pub overview: SlotsOverview,
    pub upcoming_proposers: Vec<ProposerInfo>,
    pub arrival_times: ArrivalTimes,
    pub execution_metrics: Vec<ExecutionMetrics>,
    pub epoch_metrics: EpochMetrics,
    pub head_stream: HeadStreamState,
    pub lab_history: Vec<SlotHistoryEntry>,
    pub l2_metrics: Option<L2Summary>,
}

#[derive(Clone, Debug)]
pub enum FrameState {
    Fresh(Arc<Frame>),
    /// The last refresh failed. The frame is from an earlier one.
    Stale(Arc<Frame>),
    /// No refresh has succeeded yet.
    NoFrame,
}

impl FrameState {
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Fresh(frame) | Self::Stale(frame) => Some(frame),
            Self::NoFrame => None,
        }
    }
}

pub struct Dashboard {
    chain_state: Arc<ChainState>,
    validator_set: ValidatorSet,
    lab_client: Option<Arc<LabClient>>,
    l2_tracker: Option<Arc<L2MetricsTracker>>,
    epoch_metrics: Option<EpochMetrics>,
    last_frame: Option<Arc<Frame>>,
}

impl Dashboard {
    #[must_use]
    pub const fn new(
        chain_state: Arc<ChainState>,
        validator_set: ValidatorSet,
        lab_client: Option<Arc<LabClient>>,
        l2_tracker: Option<Arc<L2MetricsTracker>>,
    ) -> Self {
        Self {
            chain_state,
            validator_set,
            lab_client,
            l2_tracker,
            epoch_metrics: None,
            last_frame: None,
        }
    }

    #[must_use]
    pub fn frame_state(&self) -> FrameState {
        self.last_frame
            .as_ref()
            .map_or(FrameState::NoFrame, |frame| FrameState::Stale(Arc::clone(frame)))
    }

    /// Builds a new frame. Falls back to the last successful frame if that fails.
    pub async fn refresh(&mut self, trigger: Trigger) -> FrameState {
        match self.render(trigger).await {
            Ok(frame) => {
                log_frame(&frame);

                let frame = Arc::new(frame);
                self.last_frame = Some(Arc::clone(&frame));

                FrameState::Fresh(frame)
            }
            Err(error) => {
                let state = self.frame_state();

                match state {
                    FrameState::NoFrame => {
                        error_with_slot!("no dashboard frame available: {error:?}");
                    }
                    _ => warn_with_slot!("showing previous dashboard frame: {error:?}"),
                }

                state
            }
        }
    }

    async fn render(&mut self, trigger: Trigger) -> Result<Frame> {
        let overview = self.chain_state.scan_window(&self.validator_set).await?;
        let epoch_data = overview.epoch_data;

        let upcoming_proposers = self
            .chain_state
            .upcoming_proposers(&self.validator_set)
            .await?;

        let epoch_metrics = self.epoch_metrics(epoch_data.current_epoch).await;

        let execution_metrics = self
            .chain_state
            .execution_metrics(epoch_data.current_epoch_start_slot, epoch_data.current_slot);

        let lab_history = self
            .lab_client
            .as_ref()
            .map(|lab_client| lab_client.history())
            .unwrap_or_default();

        Ok(Frame {
            trigger,
            overview,
            upcoming_proposers,
            arrival_times: self.chain_state.arrival_times(),
            execution_metrics,
            epoch_metrics,
            head_stream: self.chain_state.head_stream_state(),
            lab_history,
            l2_metrics: self.l2_tracker.as_ref().map(|tracker| tracker.summary()),
        })
    }

    // Validator statuses and rewards change at most once per epoch.
    async fn epoch_metrics(&mut self, epoch: Epoch) -> EpochMetrics {
        if let Some(metrics) = self.epoch_metrics.filter(|metrics| metrics.epoch == epoch) {
            return metrics;
        }

        let validator_status = self
            .chain_state
            .validator_status_summary(&self.validator_set)
            .await;

        let rewards_epoch = epoch.checked_sub(REWARDS_DELAY_EPOCHS);

        let attestation_rewards = match rewards_epoch {
            Some(rewards_epoch) => match self
                .chain_state
                .attestation_rewards(rewards_epoch, &self.validator_set)
                .await
            {
                Ok(rewards) => Some(rewards.total_rewards.iter().map(TotalReward::total).sum()),
                Err(error) => {
                    warn_with_slot!(
                        "failed to fetch attestation rewards for epoch {rewards_epoch}: {error:?}",
                    );
                    None
                }
            },
            None => None,
        };

        let metrics = EpochMetrics {
            epoch,
            validator_status,
            rewards_epoch,
            attestation_rewards,
        };

        // Failed reward lookups are retried on the next refresh.
        if rewards_epoch.is_none() || attestation_rewards.is_some() {
            self.epoch_metrics = Some(metrics);
        }

        metrics
    }
}

fn log_frame(frame: &Frame) {
    let count = |status: SlotStatus| {
        frame
            .overview
            .slots
            .iter()
            .filter(|record| record.status == status)
            .count()
    };

    let epoch_data = frame.overview.epoch_data;

    info_with_slot!(
        "dashboard refreshed on {} (slot: {}, epoch: {}, proposed: {}, missing: {}, pending: {}, \
         head stream: {})",
        frame.trigger.as_ref(),
        epoch_data.current_slot,
        epoch_data.current_epoch,
        count(SlotStatus::Proposed),
        count(SlotStatus::Missing),
        count(SlotStatus::Pending),
        frame.head_stream,
    );

    if let Some(proposer) = frame
        .upcoming_proposers
        .iter()
        .find(|proposer| proposer.tracked && proposer.slot >= epoch_data.current_slot)
    {
        info_with_slot!(
            "next tracked proposal: validator {} in slot {}",
            proposer.validator_index,
            proposer.slot,
        );
    }

    match serde_json::to_string(frame) {
        Ok(json) => debug_with_slot!("dashboard frame: {json}"),
        Err(error) => warn_with_slot!("failed to serialize dashboard frame: {error}"),
    }
}
