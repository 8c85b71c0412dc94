use core::convert::Infallible;

use anyhow::Result;
use clock::Timespec;
use logging::{trace_with_slot, SLOT_LOG_METRICS};
use types::primitives::Slot;

use crate::chain_state::ChainState;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotNotification {
    pub slot: Slot,
    pub timestamp: Timespec,
}

impl ChainState {
    /// Notifies slot listeners at the start of every slot.
    ///
    /// This never returns `Ok`. It is meant to be restarted by a supervisor.
    pub async fn run_slot_timer(&self) -> Result<Infallible> {
        loop {
            let (next_slot, delay) = self.clock.time_until_next_slot()?;

            trace_with_slot!("waiting {delay:?} for slot {next_slot}");

            tokio::time::sleep(delay).await;

            let slot = self.clock.current_slot()?;

            // The wall clock and the timer may disagree by a few milliseconds.
            if slot < next_slot {
                continue;
            }

            SLOT_LOG_METRICS.set_wall_clock_slot(slot);

            self.slot_listeners.notify(&SlotNotification {
                slot,
                timestamp: self.clock.now()?,
            });
        }
    }
}
