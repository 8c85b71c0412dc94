use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, Display};

use crate::primitives::Slot;

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotStatus {
    /// The slot has not started yet.
    Upcoming,
    /// No block has been seen yet, but one may still arrive.
    Pending,
    Proposed,
    Missing,
}

/// Status of a single slot as shown on the dashboard.
///
/// `block_payload` holds the full `/eth/v2/beacon/blocks/{slot}` response for proposed slots
/// that are recent enough to still have it cached.
#[derive(Clone, Debug, Serialize)]
pub struct SlotRecord {
    pub slot: Slot,
    pub status: SlotStatus,
    #[serde(skip)]
    pub block_payload: Option<Arc<Value>>,
}

impl SlotRecord {
    #[must_use]
    pub const fn new(slot: Slot, status: SlotStatus) -> Self {
        Self {
            slot,
            status,
            block_payload: None,
        }
    }

    #[must_use]
    pub const fn proposed(slot: Slot, block_payload: Arc<Value>) -> Self {
        Self {
            slot,
            status: SlotStatus::Proposed,
            block_payload: Some(block_payload),
        }
    }
}

impl PartialEq for SlotRecord {
    // Payloads are compared by identity. Two records of the same slot only ever carry different
    // payloads if the block was fetched twice.
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
            && self.status == other.status
            && match (&self.block_payload, &other.block_payload) {
                (Some(left), Some(right)) => Arc::ptr_eq(left, right),
                (None, None) => true,
                _ => false,
            }
    }
}

/// Time at which the head block of `slot` was observed, relative to the start of the slot.
///
/// Negative values mean the block arrived before the slot started by local clock.
#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
pub struct ArrivalSample {
    pub slot: Slot,
    pub arrival_time: f64,
}
