//! Slot, duty and block tracking for a beacon chain dashboard.
//!
//! [`ChainState`] owns every cache and is the only entry point. Two background tasks keep it
//! current: a head event subscriber and a slot timer. Both are started with
//! [`ChainState::spawn_background_tasks`].

pub use crate::{
    block_cache::{BlockCache, BlockLookup, Classification},
    chain_state::{ArrivalTimes, ChainState, CheckpointSummary, SlotsOverview},
    config::{
        CacheConfig, Config, WindowConfig, DEFAULT_ARRIVAL_HISTORY_CAPACITY,
        DEFAULT_BLOCK_CACHE_EPOCHS, DEFAULT_EPOCHS_AHEAD, DEFAULT_EPOCHS_BEHIND,
        DEFAULT_HEAD_STREAM_BACKOFF, DEFAULT_MISSING_THRESHOLD_SLOTS,
        DEFAULT_PAYLOAD_RETENTION_SLOTS, DEFAULT_REWARDS_CACHE_CAPACITY,
        DEFAULT_SLOT_TIMER_BACKOFF,
    },
    duty_cache::{CombinedDuties, DutyCache, DutySet, ProposalEpoch, ProposerInfo},
    head_subscriber::{HeadNotification, HeadStreamState},
    metrics::{ExecutionMetrics, ValidatorStatusSummary},
    slot_timer::SlotNotification,
};

mod arrival_history;
mod block_cache;
mod chain_state;
mod config;
mod duty_cache;
mod head_subscriber;
mod listeners;
mod metrics;
mod scanner;
mod slot_timer;
