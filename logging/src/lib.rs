use core::sync::atomic::{AtomicU64, Ordering};

use derive_more::Display;

pub use tracing;

pub static SLOT_LOG_METRICS: SlotLogMetrics = SlotLogMetrics::new();

/// Slot numbers prepended to every log line.
///
/// `wall_clock_slot` is advanced by the slot timer, `head_slot` by the head event subscriber.
/// A gap between them in the logs is the quickest way to spot a lagging beacon node.
#[derive(Display, Debug)]
#[display("slot: {wall_clock_slot:?}, head: {head_slot:?}")]
pub struct SlotLogMetrics {
    wall_clock_slot: AtomicU64,
    head_slot: AtomicU64,
}

impl SlotLogMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wall_clock_slot: AtomicU64::new(0),
            head_slot: AtomicU64::new(0),
        }
    }

    pub fn set_wall_clock_slot(&self, slot: u64) {
        self.wall_clock_slot.store(slot, Ordering::Relaxed)
    }

    pub fn set_head_slot(&self, slot: u64) {
        self.head_slot.fetch_max(slot, Ordering::Relaxed);
    }

    #[must_use]
    pub fn head_slot(&self) -> u64 {
        self.head_slot.load(Ordering::Relaxed)
    }
}

impl Default for SlotLogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[macro_export]
macro_rules! info_with_slot {
    ($($arg:tt)*) => {
        $crate::tracing::info!("[{}] {}", $crate::SLOT_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! debug_with_slot {
    ($($arg:tt)*) => {
        $crate::tracing::debug!("[{}] {}", $crate::SLOT_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! warn_with_slot {
    ($($arg:tt)*) => {
        $crate::tracing::warn!("[{}] {}", $crate::SLOT_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! error_with_slot {
    ($($arg:tt)*) => {
        $crate::tracing::error!("[{}] {}", $crate::SLOT_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! trace_with_slot {
    ($($arg:tt)*) => {
        $crate::tracing::trace!("[{}] {}", $crate::SLOT_LOG_METRICS, format_args!($($arg)*));
    };
}
