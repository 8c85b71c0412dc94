use core::num::NonZeroUsize;
use std::collections::VecDeque;

use types::slot::ArrivalSample;

/// Most recent head block arrival times, oldest first.
pub struct ArrivalHistory {
    capacity: NonZeroUsize,
    samples: VecDeque<ArrivalSample>,
}

impl ArrivalHistory {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.get()),
        }
    }

    pub fn push(&mut self, sample: ArrivalSample) {
        if self.samples.len() == self.capacity.get() {
            self.samples.pop_front();
        }

        self.samples.push_back(sample);
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ArrivalSample> {
        self.samples.iter().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;

    use super::*;

    #[test]
    fn keeps_most_recent_samples_in_arrival_order() {
        let mut history = ArrivalHistory::new(nonzero!(16_usize));

        for slot in 0..20 {
            history.push(ArrivalSample {
                slot,
                arrival_time: 1.5,
            });
        }

        let slots = history
            .to_vec()
            .into_iter()
            .map(|sample| sample.slot)
            .collect::<Vec<_>>();

        assert_eq!(history.len(), 16);
        assert_eq!(slots, (4..20).collect::<Vec<_>>());
    }

    #[test]
    fn starts_empty() {
        let history = ArrivalHistory::new(nonzero!(1_usize));

        assert!(history.is_empty());
        assert_eq!(history.to_vec(), []);
    }
}
