use core::{num::NonZeroUsize, ops::RangeInclusive, time::Duration};

use nonzero_ext::nonzero;
use types::primitives::{Epoch, Slot};

pub const DEFAULT_MISSING_THRESHOLD_SLOTS: Slot = 2;
pub const DEFAULT_BLOCK_CACHE_EPOCHS: Epoch = 8;
pub const DEFAULT_PAYLOAD_RETENTION_SLOTS: Slot = 32;
pub const DEFAULT_ARRIVAL_HISTORY_CAPACITY: NonZeroUsize = nonzero!(16_usize);
pub const DEFAULT_REWARDS_CACHE_CAPACITY: NonZeroUsize = nonzero!(10_usize);

pub const DEFAULT_EPOCHS_BEHIND: Epoch = 5;
pub const DEFAULT_EPOCHS_AHEAD: Epoch = 1;
pub const DEFAULT_HEAD_STREAM_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_SLOT_TIMER_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// A past slot without a block is only considered missing once it is older than this.
    /// Younger slots stay pending because a late block may still arrive.
    pub missing_threshold_slots: Slot,
    pub block_cache_epochs: Epoch,
    /// Proposed slots older than this keep their status but drop the block payload.
    pub payload_retention_slots: Slot,
    pub arrival_history_capacity: NonZeroUsize,
    pub rewards_cache_capacity: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            missing_threshold_slots: DEFAULT_MISSING_THRESHOLD_SLOTS,
            block_cache_epochs: DEFAULT_BLOCK_CACHE_EPOCHS,
            payload_retention_slots: DEFAULT_PAYLOAD_RETENTION_SLOTS,
            arrival_history_capacity: DEFAULT_ARRIVAL_HISTORY_CAPACITY,
            rewards_cache_capacity: DEFAULT_REWARDS_CACHE_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub cache: CacheConfig,
    pub window: WindowConfig,
    pub head_stream_backoff: Duration,
    pub slot_timer_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            window: WindowConfig::default(),
            head_stream_backoff: DEFAULT_HEAD_STREAM_BACKOFF,
            slot_timer_backoff: DEFAULT_SLOT_TIMER_BACKOFF,
        }
    }
}

/// Epochs around the current one covered by [`ChainState::scan_window`].
///
/// [`ChainState::scan_window`]: crate::ChainState::scan_window
#[derive(Clone, Copy, Debug)]
pub struct WindowConfig {
    pub epochs_behind: Epoch,
    pub epochs_ahead: Epoch,
}

impl WindowConfig {
    /// Slots of the window around the epoch starting at `current_epoch_start_slot`.
    #[must_use]
    pub const fn slots(
        self,
        current_epoch_start_slot: Slot,
        slots_per_epoch: u64,
    ) -> RangeInclusive<Slot> {
        let behind = self.epochs_behind.saturating_mul(slots_per_epoch);
        let ahead = self
            .epochs_ahead
            .saturating_add(1)
            .saturating_mul(slots_per_epoch);

        let start_slot = current_epoch_start_slot.saturating_sub(behind);
        let end_slot = current_epoch_start_slot
            .saturating_add(ahead)
            .saturating_sub(1);

        start_slot..=end_slot
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            epochs_behind: DEFAULT_EPOCHS_BEHIND,
            epochs_ahead: DEFAULT_EPOCHS_AHEAD,
        }
    }
}
