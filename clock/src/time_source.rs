//! Sources of wall-clock time for [`SlotClock`].
//!
//! [`SlotClock`]: crate::SlotClock

use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use std::{sync::Arc, time::SystemTime};

use anyhow::Result;

/// Time as a [`Duration`] after the Unix epoch.
///
/// Representing time this way lets us reuse `Duration` arithmetic everywhere.
/// Times before the Unix epoch cannot be represented, but they are not needed in this project.
pub type Timespec = Duration;

pub trait TimeSource: Send + Sync {
    fn now(&self) -> Result<Timespec>;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<Timespec> {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(Into::into)
    }
}

/// A manually driven clock with millisecond precision.
///
/// Clones share the same underlying time, so a test can keep one handle and give another to the
/// code under test.
#[derive(Clone, Default, Debug)]
pub struct FakeTimeSource {
    millis: Arc<AtomicU64>,
}

impl FakeTimeSource {
    #[must_use]
    pub fn new(now: Timespec) -> Self {
        let source = Self::default();
        source.set(now);
        source
    }

    pub fn set(&self, now: Timespec) {
        let millis = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> Result<Timespec> {
        Ok(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
    }
}
