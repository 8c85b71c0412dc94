use std::{collections::VecDeque, sync::Arc};

use anyhow::{Context as _, Result};
use beacon_api::{AttestationRewards, BeaconApi};
use clock::{EpochSnapshot, SlotClock, TimeSource};
use logging::{info_with_slot, warn_with_slot, SLOT_LOG_METRICS};
use parking_lot::Mutex;
use serde::Serialize;
use supervisor::{BackgroundTasks, RestartPolicy};
use types::{
    config::ChainConfig,
    primitives::{Epoch, Slot, H256},
    slot::{ArrivalSample, SlotRecord},
    validator_set::ValidatorSet,
};

use crate::{
    arrival_history::ArrivalHistory,
    block_cache::BlockCache,
    config::Config,
    duty_cache::{CombinedDuties, DutyCache, ProposerInfo},
    head_subscriber::{HeadNotification, HeadStreamState},
    listeners::Listeners,
    metrics::{self, ExecutionMetrics, RewardsCache, ValidatorStatusSummary},
    scanner::SlotScanner,
    slot_timer::SlotNotification,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct CheckpointSummary {
    pub finalized: Epoch,
    pub justified: Epoch,
}

/// Everything the dashboard shows about recent and upcoming slots.
#[derive(Clone, Debug, Serialize)]
pub struct SlotsOverview {
    pub slots: Vec<SlotRecord>,
    pub epoch_data: EpochSnapshot,
    /// `None` if the checkpoints could not be fetched.
    pub checkpoints: Option<CheckpointSummary>,
    pub duties: CombinedDuties,
}

#[derive(Clone, Debug, Serialize)]
pub struct ArrivalTimes {
    pub arrival_times: Vec<ArrivalSample>,
    pub seconds_per_slot: u64,
}

/// Chain state tracked for one beacon node.
///
/// Caches are only ever locked for synchronous sections, never across an `.await`.
pub struct ChainState {
    pub(crate) api: BeaconApi,
    pub(crate) clock: SlotClock,
    pub(crate) config: Config,
    pub(crate) duty_cache: DutyCache,
    pub(crate) block_cache: BlockCache,
    pub(crate) rewards_cache: RewardsCache,
    pub(crate) arrival_history: Mutex<ArrivalHistory>,
    pub(crate) delivered_heads: Mutex<VecDeque<(Slot, H256)>>,
    pub(crate) head_stream_state: Mutex<HeadStreamState>,
    pub(crate) head_listeners: Listeners<HeadNotification>,
    pub(crate) slot_listeners: Listeners<SlotNotification>,
}

impl ChainState {
    /// Loads the chain configuration from the beacon node.
    ///
    /// Fails if the node is unreachable or reports an unusable configuration.
    pub async fn initialize(
        api: BeaconApi,
        config: Config,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let chain_config = api
            .chain_config()
            .await
            .with_context(|| format!("failed to load chain configuration from {}", api.url()))?;

        info_with_slot!(
            "loaded chain configuration (seconds per slot: {}, slots per epoch: {}, genesis time: {})",
            chain_config.seconds_per_slot,
            chain_config.slots_per_epoch,
            chain_config.genesis_time,
        );

        let clock = SlotClock::new(chain_config, time_source);

        match clock.current_slot() {
            Ok(slot) => SLOT_LOG_METRICS.set_wall_clock_slot(slot),
            Err(error) => warn_with_slot!("{error}"),
        }

        Ok(Self::new(api, clock, config))
    }

    #[must_use]
    pub fn new(api: BeaconApi, clock: SlotClock, config: Config) -> Self {
        Self {
            api,
            clock,
            config,
            duty_cache: DutyCache::default(),
            block_cache: BlockCache::default(),
            rewards_cache: RewardsCache::new(config.cache.rewards_cache_capacity),
            arrival_history: Mutex::new(ArrivalHistory::new(
                config.cache.arrival_history_capacity,
            )),
            delivered_heads: Mutex::new(VecDeque::new()),
            head_stream_state: Mutex::new(HeadStreamState::Disconnected),
            head_listeners: Listeners::new("head"),
            slot_listeners: Listeners::new("slot"),
        }
    }

    #[must_use]
    pub const fn chain_config(&self) -> &ChainConfig {
        self.clock.config()
    }

    #[must_use]
    pub const fn clock(&self) -> &SlotClock {
        &self.clock
    }

    pub fn current_slot(&self) -> Result<Slot> {
        self.clock.current_slot()
    }

    pub fn epoch_snapshot(&self) -> Result<EpochSnapshot> {
        self.clock.epoch_snapshot()
    }

    /// Scans the dashboard window and refreshes duties.
    ///
    /// Individual lookups that fail are reported as degraded statuses. Only a clock failure
    /// fails the whole scan.
    pub async fn scan_window(&self, validator_set: &ValidatorSet) -> Result<SlotsOverview> {
        let epoch_data = self.epoch_snapshot()?;

        let EpochSnapshot {
            current_slot,
            current_epoch,
            current_epoch_start_slot,
            slots_per_epoch,
            ..
        } = epoch_data;

        SLOT_LOG_METRICS.set_wall_clock_slot(current_slot);

        let window = self
            .config
            .window
            .slots(current_epoch_start_slot, slots_per_epoch);

        let scanner = SlotScanner::new(
            &self.api,
            &self.block_cache,
            self.config.cache.missing_threshold_slots,
        );

        let (slots, checkpoints, ()) = futures::join!(
            scanner.scan_window(*window.start(), *window.end(), current_slot),
            self.checkpoints(),
            self.duty_cache
                .ensure_duties(&self.api, validator_set, current_epoch),
        );

        let duties = self
            .duty_cache
            .combined_duties([current_epoch, current_epoch + 1], validator_set);

        self.sweep(current_slot);

        Ok(SlotsOverview {
            slots,
            epoch_data,
            checkpoints,
            duties,
        })
    }

    pub async fn upcoming_proposers(
        &self,
        validator_set: &ValidatorSet,
    ) -> Result<Vec<ProposerInfo>> {
        let current_slot = self.current_slot()?;
        let current_epoch = self.chain_config().epoch_at_slot(current_slot);

        self.duty_cache
            .ensure_duties(&self.api, validator_set, current_epoch)
            .await;

        Ok(self
            .duty_cache
            .upcoming_proposers(validator_set, current_slot, self.chain_config()))
    }

    pub fn register_head_listener(
        &self,
        listener: impl Fn(&HeadNotification) -> Result<()> + Send + Sync + 'static,
    ) {
        self.head_listeners.register(listener);
    }

    pub fn register_slot_listener(
        &self,
        listener: impl Fn(&SlotNotification) -> Result<()> + Send + Sync + 'static,
    ) {
        self.slot_listeners.register(listener);
    }

    /// Recent head block arrival times, most recent last.
    #[must_use]
    pub fn arrival_time_history(&self) -> Vec<ArrivalSample> {
        self.arrival_history.lock().to_vec()
    }

    #[must_use]
    pub fn arrival_times(&self) -> ArrivalTimes {
        ArrivalTimes {
            arrival_times: self.arrival_time_history(),
            seconds_per_slot: self.chain_config().seconds_per_slot.get(),
        }
    }

    pub async fn attestation_rewards(
        &self,
        epoch: Epoch,
        validator_set: &ValidatorSet,
    ) -> Result<Arc<AttestationRewards>> {
        self.rewards_cache
            .get_or_fetch(&self.api, epoch, validator_set)
            .await
    }

    pub async fn validator_status_summary(
        &self,
        validator_set: &ValidatorSet,
    ) -> ValidatorStatusSummary {
        metrics::validator_status_summary(&self.api, validator_set).await
    }

    /// Metrics of proposed slots in `start_slot..=end_slot` whose blocks are still cached.
    #[must_use]
    pub fn execution_metrics(&self, start_slot: Slot, end_slot: Slot) -> Vec<ExecutionMetrics> {
        ExecutionMetrics::from_records(&self.block_cache.records_in(start_slot..=end_slot))
    }

    pub fn sweep(&self, current_slot: Slot) {
        self.block_cache.sweep(
            current_slot,
            self.chain_config().slots_per_epoch.get(),
            &self.config.cache,
        );
    }

    /// Starts the head event subscriber and the slot timer.
    ///
    /// The tasks run until the returned value is shut down or dropped.
    #[must_use]
    pub fn spawn_background_tasks(self: &Arc<Self>) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::default();

        tasks.spawn(
            "head event subscriber",
            RestartPolicy::fixed(self.config.head_stream_backoff),
            {
                let chain_state = Arc::clone(self);
                move || {
                    let chain_state = Arc::clone(&chain_state);
                    async move { chain_state.follow_head_events().await }
                }
            },
        );

        tasks.spawn(
            "slot timer",
            RestartPolicy::fixed(self.config.slot_timer_backoff),
            {
                let chain_state = Arc::clone(self);
                move || {
                    let chain_state = Arc::clone(&chain_state);
                    async move { chain_state.run_slot_timer().await }
                }
            },
        );

        tasks
    }

    async fn checkpoints(&self) -> Option<CheckpointSummary> {
        match self.api.finality_checkpoints().await {
            Ok(checkpoints) => Some(CheckpointSummary {
                finalized: checkpoints.finalized.epoch,
                justified: checkpoints.current_justified.epoch,
            }),
            Err(error) => {
                warn_with_slot!("failed to fetch finality checkpoints: {error:?}");
                None
            }
        }
    }
}
