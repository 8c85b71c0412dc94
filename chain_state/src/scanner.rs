use std::sync::Arc;

use beacon_api::BeaconApi;
use futures::future;
use logging::{debug_with_slot, warn_with_slot};
use types::{
    primitives::Slot,
    slot::{SlotRecord, SlotStatus},
};

use crate::block_cache::{self, BlockCache, BlockLookup};

/// Determines the status of a range of slots, serving final records from the cache.
pub struct SlotScanner<'cache> {
    api: &'cache BeaconApi,
    cache: &'cache BlockCache,
    missing_threshold_slots: Slot,
}

impl<'cache> SlotScanner<'cache> {
    #[must_use]
    pub const fn new(
        api: &'cache BeaconApi,
        cache: &'cache BlockCache,
        missing_threshold_slots: Slot,
    ) -> Self {
        Self {
            api,
            cache,
            missing_threshold_slots,
        }
    }

    /// Checks every slot in `start_slot..=end_slot` concurrently.
    ///
    /// Records are returned in slot order. Lookup failures degrade the affected slots instead of
    /// failing the whole scan.
    pub async fn scan_window(
        &self,
        start_slot: Slot,
        end_slot: Slot,
        current_slot: Slot,
    ) -> Vec<SlotRecord> {
        debug_with_slot!("scanning slots {start_slot}..={end_slot} (current slot: {current_slot})");

        future::join_all((start_slot..=end_slot).map(|slot| self.check_slot(slot, current_slot)))
            .await
    }

    pub async fn check_slot(&self, slot: Slot, current_slot: Slot) -> SlotRecord {
        if slot > current_slot {
            return SlotRecord::new(slot, SlotStatus::Upcoming);
        }

        if let Some(record) = self.cache.get(slot) {
            return record;
        }

        let lookup = match self.api.block(slot).await {
            Ok(Some(block)) => BlockLookup::Found(Arc::new(block)),
            Ok(None) => BlockLookup::NotFound,
            Err(error) => {
                warn_with_slot!("failed to fetch block at slot {slot}: {error:?}");
                BlockLookup::Failed
            }
        };

        let classification =
            block_cache::classify(slot, current_slot, lookup, self.missing_threshold_slots);

        if classification.cacheable {
            self.cache.insert(classification.record.clone());
        }

        classification.record
    }
}
