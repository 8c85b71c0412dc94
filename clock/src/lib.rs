//! Conversion between wall-clock time and beacon chain slots and epochs.
//!
//! [`SlotClock`] does no I/O of its own. Time is read through a [`TimeSource`], which makes every
//! calculation reproducible in tests with [`FakeTimeSource`].

use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use types::{
    config::ChainConfig,
    primitives::{Epoch, Slot},
};

pub use crate::time_source::{FakeTimeSource, SystemTimeSource, TimeSource, Timespec};

mod time_source;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("current time {now:?} is before genesis at {genesis_time}")]
    BeforeGenesis { now: Timespec, genesis_time: u64 },
    #[error("start time of slot {slot} does not fit in a timestamp")]
    SlotOverflow { slot: Slot },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct EpochSnapshot {
    pub current_slot: Slot,
    pub current_epoch: Epoch,
    pub current_epoch_start_slot: Slot,
    pub previous_epoch_start_slot: Slot,
    pub slots_per_epoch: u64,
}

#[derive(Clone)]
pub struct SlotClock {
    config: ChainConfig,
    time_source: Arc<dyn TimeSource>,
}

impl SlotClock {
    #[must_use]
    pub fn new(config: ChainConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            time_source,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn now(&self) -> Result<Timespec> {
        self.time_source.now()
    }

    pub fn current_slot(&self) -> Result<Slot> {
        self.slot_at(self.now()?)
    }

    pub fn current_epoch(&self) -> Result<Epoch> {
        Ok(self.config.epoch_at_slot(self.current_slot()?))
    }

    pub fn slot_at(&self, now: Timespec) -> Result<Slot> {
        let genesis_time = self.config.genesis_time;

        let elapsed = now
            .checked_sub(Duration::from_secs(genesis_time))
            .ok_or(ClockError::BeforeGenesis { now, genesis_time })?;

        Ok(elapsed.as_secs() / self.config.seconds_per_slot.get())
    }

    pub fn slot_start_time(&self, slot: Slot) -> Result<Timespec> {
        let seconds = slot
            .checked_mul(self.config.seconds_per_slot.get())
            .and_then(|offset| offset.checked_add(self.config.genesis_time))
            .ok_or(ClockError::SlotOverflow { slot })?;

        Ok(Duration::from_secs(seconds))
    }

    pub fn epoch_snapshot(&self) -> Result<EpochSnapshot> {
        Ok(self.epoch_snapshot_at(self.current_slot()?))
    }

    #[must_use]
    pub const fn epoch_snapshot_at(&self, current_slot: Slot) -> EpochSnapshot {
        let current_epoch = self.config.epoch_at_slot(current_slot);

        EpochSnapshot {
            current_slot,
            current_epoch,
            current_epoch_start_slot: self.config.start_slot_at_epoch(current_epoch),
            previous_epoch_start_slot: self
                .config
                .start_slot_at_epoch(current_epoch.saturating_sub(1)),
            slots_per_epoch: self.config.slots_per_epoch.get(),
        }
    }

    /// Returns the next slot and how long it is until it starts.
    pub fn time_until_next_slot(&self) -> Result<(Slot, Duration)> {
        let now = self.now()?;
        let next_slot = self.slot_at(now)? + 1;
        let next_slot_start = self.slot_start_time(next_slot)?;

        Ok((next_slot, next_slot_start.saturating_sub(now)))
    }

    /// Seconds between the start of `slot` and `now`, negative if `now` is before the slot.
    pub fn arrival_time(&self, slot: Slot, now: Timespec) -> Result<f64> {
        let slot_start = self.slot_start_time(slot)?;

        let difference_millis = i128::try_from(now.as_millis())?
            - i128::try_from(slot_start.as_millis())?;

        #[expect(
            clippy::cast_precision_loss,
            reason = "realistic differences are far below 2^52 milliseconds"
        )]
        let difference_millis = difference_millis as f64;

        Ok(difference_millis / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use nonzero_ext::nonzero;
    use test_case::test_case;

    use super::*;

    const GENESIS_TIME: u64 = 1_606_824_023;

    fn clock_at(seconds_after_genesis: u64) -> (SlotClock, FakeTimeSource) {
        let time_source =
            FakeTimeSource::new(Duration::from_secs(GENESIS_TIME + seconds_after_genesis));
        let clock = SlotClock::new(ChainConfig::mainnet(), Arc::new(time_source.clone()));
        (clock, time_source)
    }

    #[test]
    fn current_slot_and_epoch_forty_slots_after_genesis() -> Result<()> {
        let (clock, _) = clock_at(12 * 40 + 5);

        assert_eq!(clock.current_slot()?, 40);
        assert_eq!(clock.current_epoch()?, 1);

        Ok(())
    }

    #[test_case(0 => 0)]
    #[test_case(11 => 0)]
    #[test_case(12 => 1)]
    #[test_case(383 => 31)]
    #[test_case(384 => 32)]
    fn slot_at_seconds_after_genesis(seconds: u64) -> Slot {
        let (clock, _) = clock_at(seconds);
        clock.current_slot().expect("time is after genesis")
    }

    #[test]
    fn current_slot_fails_before_genesis() {
        let time_source = FakeTimeSource::new(Duration::from_secs(GENESIS_TIME - 1));
        let clock = SlotClock::new(ChainConfig::mainnet(), Arc::new(time_source));

        let error = clock.current_slot().expect_err("time is before genesis");

        assert!(matches!(
            error.downcast_ref(),
            Some(ClockError::BeforeGenesis { .. }),
        ));
    }

    #[test]
    fn current_slot_is_monotonic_and_bounded_by_slot_start_times() -> Result<()> {
        let (clock, time_source) = clock_at(0);

        let slots = (0..200)
            .map(|_| {
                time_source.advance(Duration::from_millis(1_700));

                let now = clock.now()?;
                let slot = clock.current_slot()?;

                assert!(clock.slot_start_time(slot)? <= now);
                assert!(now < clock.slot_start_time(slot + 1)?);

                Ok(slot)
            })
            .collect::<Result<Vec<_>>>()?;

        assert!(slots.iter().tuple_windows().all(|(older, newer)| older <= newer));

        Ok(())
    }

    #[test]
    fn slot_start_time_overflow_is_an_error() {
        let (clock, _) = clock_at(0);

        let error = clock
            .slot_start_time(Slot::MAX)
            .expect_err("slot start time should overflow");

        assert!(matches!(
            error.downcast_ref(),
            Some(ClockError::SlotOverflow { slot: Slot::MAX }),
        ));
    }

    #[test_case(0 => (0, 0, 0))]
    #[test_case(31 => (0, 0, 0))]
    #[test_case(40 => (1, 32, 0))]
    #[test_case(100 => (3, 96, 64))]
    fn epoch_snapshot_saturates_in_epoch_zero(slot: Slot) -> (Epoch, Slot, Slot) {
        let (clock, _) = clock_at(0);

        let snapshot = clock.epoch_snapshot_at(slot);

        (
            snapshot.current_epoch,
            snapshot.current_epoch_start_slot,
            snapshot.previous_epoch_start_slot,
        )
    }

    #[test]
    fn time_until_next_slot_counts_down_to_the_boundary() -> Result<()> {
        let (clock, time_source) = clock_at(12 * 7 + 4);

        assert_eq!(clock.time_until_next_slot()?, (8, Duration::from_secs(8)));

        time_source.advance(Duration::from_millis(7_750));

        assert_eq!(clock.time_until_next_slot()?, (8, Duration::from_millis(250)));

        Ok(())
    }

    #[test]
    fn arrival_time_is_signed() -> Result<()> {
        let config = ChainConfig {
            seconds_per_slot: nonzero!(12_u64),
            slots_per_epoch: nonzero!(32_u64),
            genesis_time: 1_000,
        };
        let clock = SlotClock::new(config, Arc::new(FakeTimeSource::default()));

        let late = clock.arrival_time(10, Duration::from_millis(1_120_250))?;
        let early = clock.arrival_time(10, Duration::from_millis(1_119_500))?;

        assert!((late - 0.25).abs() < f64::EPSILON);
        assert!((early + 0.5).abs() < f64::EPSILON);

        Ok(())
    }
}
