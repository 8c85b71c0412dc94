//! Beacon Node API response bodies.
//!
//! Beacon nodes encode most integers as strings. Every numeric field also accepts native JSON
//! numbers because some nodes and proxies are less strict than the API definition.

use core::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use strum::{AsRefStr, Display};
use types::primitives::{Epoch, Slot, UnixSeconds, ValidatorIndex, H256};

#[derive(Deserialize)]
pub(crate) struct DataResponse<T> {
    pub data: T,
}

/// The subset of `/eth/v1/config/spec` needed for slot arithmetic.
#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Spec {
    #[serde(rename = "SECONDS_PER_SLOT")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub seconds_per_slot: NonZeroU64,
    #[serde(rename = "SLOTS_PER_EPOCH")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub slots_per_epoch: NonZeroU64,
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Genesis {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub genesis_time: UnixSeconds,
}

#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Checkpoint {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct FinalityCheckpoints {
    pub previous_justified: Checkpoint,
    pub current_justified: Checkpoint,
    pub finalized: Checkpoint,
}

#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ProposerDuty {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub validator_index: ValidatorIndex,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub slot: Slot,
}

#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct AttesterDuty {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub validator_index: ValidatorIndex,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub slot: Slot,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
    #[serde(other)]
    Unknown,
}

#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ValidatorResponse {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub index: ValidatorIndex,
    pub status: ValidatorStatus,
}

#[serde_as]
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct TotalReward {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub validator_index: ValidatorIndex,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub head: i64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub target: i64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub source: i64,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    pub inclusion_delay: Option<i64>,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub inactivity: i64,
}

impl TotalReward {
    #[must_use]
    pub fn total(&self) -> i64 {
        self.head + self.target + self.source + self.inclusion_delay.unwrap_or_default()
            - self.inactivity.abs()
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct AttestationRewards {
    #[serde(default)]
    pub ideal_rewards: Vec<Value>,
    pub total_rewards: Vec<TotalReward>,
}

/// Data of a `head` event.
///
/// Fields other than the slot and block root are kept verbatim so listeners can use them without
/// this crate having to track every field nodes add.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct HeadEvent {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub slot: Slot,
    pub block: H256,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}
