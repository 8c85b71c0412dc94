use core::num::NonZeroU64;

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::primitives::{Epoch, Slot, UnixSeconds};

/// Chain parameters needed for slot arithmetic.
///
/// Assembled once at startup from `/eth/v1/config/spec` and `/eth/v1/beacon/genesis`.
/// Every other component treats it as immutable.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct ChainConfig {
    pub seconds_per_slot: NonZeroU64,
    pub slots_per_epoch: NonZeroU64,
    pub genesis_time: UnixSeconds,
}

impl ChainConfig {
    /// Parameters of Ethereum mainnet (genesis on 2020-12-01 12:00:23 UTC).
    #[must_use]
    pub const fn mainnet() -> Self {
        Self {
            seconds_per_slot: nonzero!(12_u64),
            slots_per_epoch: nonzero!(32_u64),
            genesis_time: 1_606_824_023,
        }
    }

    #[must_use]
    pub const fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn start_slot_at_epoch(&self, epoch: Epoch) -> Slot {
        epoch.saturating_mul(self.slots_per_epoch.get())
    }
}
