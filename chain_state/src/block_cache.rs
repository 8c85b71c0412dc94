use core::ops::RangeInclusive;
use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value;
use types::{
    primitives::Slot,
    slot::{SlotRecord, SlotStatus},
};

use crate::config::CacheConfig;

/// Outcome of asking the beacon node for the block of a slot.
#[derive(Clone, Debug)]
pub enum BlockLookup {
    Found(Arc<Value>),
    NotFound,
    Failed,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Classification {
    pub record: SlotRecord,
    /// Whether the record is final and may be served from the cache from now on.
    pub cacheable: bool,
}

/// Classifies a slot at or before `current_slot` after a block lookup.
///
/// Slots after `current_slot` are upcoming and never looked up.
#[must_use]
pub fn classify(
    slot: Slot,
    current_slot: Slot,
    lookup: BlockLookup,
    missing_threshold_slots: Slot,
) -> Classification {
    let is_current = slot >= current_slot;

    let (status, cacheable, block_payload) = match lookup {
        BlockLookup::Found(payload) => (SlotStatus::Proposed, true, Some(payload)),
        BlockLookup::NotFound | BlockLookup::Failed if is_current => {
            (SlotStatus::Pending, false, None)
        }
        BlockLookup::NotFound if current_slot - slot > missing_threshold_slots => {
            (SlotStatus::Missing, true, None)
        }
        BlockLookup::NotFound => (SlotStatus::Pending, false, None),
        BlockLookup::Failed => (SlotStatus::Missing, false, None),
    };

    Classification {
        record: SlotRecord {
            slot,
            status,
            block_payload,
        },
        cacheable,
    }
}

/// Final slot records keyed by slot.
#[derive(Default)]
pub struct BlockCache {
    records: Mutex<BTreeMap<Slot, SlotRecord>>,
}

impl BlockCache {
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<SlotRecord> {
        self.records.lock().get(&slot).cloned()
    }

    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool {
        self.records.lock().contains_key(&slot)
    }

    pub fn insert(&self, record: SlotRecord) {
        self.records.lock().insert(record.slot, record);
    }

    #[must_use]
    pub fn records_in(&self, slots: RangeInclusive<Slot>) -> Vec<SlotRecord> {
        self.records
            .lock()
            .range(slots)
            .map(|(_, record)| record.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Removes records older than the cache window and payloads older than the retention window.
    pub fn sweep(&self, current_slot: Slot, slots_per_epoch: u64, config: &CacheConfig) {
        let mut records = self.records.lock();

        let retained_slots = config.block_cache_epochs.saturating_mul(slots_per_epoch);

        if let Some(slot_boundary) = current_slot.checked_sub(retained_slots) {
            *records = records.split_off(&slot_boundary);
        }

        if let Some(payload_boundary) = current_slot.checked_sub(config.payload_retention_slots) {
            for record in records.range_mut(..payload_boundary).map(|(_, record)| record) {
                record.block_payload = None;
            }
        }
    }
}
