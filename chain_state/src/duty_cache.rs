use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use beacon_api::BeaconApi;
use futures::future;
use logging::{debug_with_slot, warn_with_slot};
use parking_lot::Mutex;
use serde::Serialize;
use strum::AsRefStr;
use types::{
    config::ChainConfig,
    primitives::{Epoch, Slot, ValidatorIndex},
    validator_set::ValidatorSet,
};

/// Duties of one epoch.
///
/// `proposer_duties` is the full proposer schedule of the epoch.
/// `attester_duties` only covers the validator set the cache was filled for.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct DutySet {
    pub proposer_duties: BTreeMap<Slot, ValidatorIndex>,
    pub attester_duties: BTreeSet<Slot>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Serialize)]
pub struct CombinedDuties {
    pub proposer: BTreeMap<Slot, ValidatorIndex>,
    pub attester: BTreeSet<Slot>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProposalEpoch {
    CurrentEpoch,
    NextEpoch,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ProposerInfo {
    pub slot: Slot,
    pub validator_index: ValidatorIndex,
    pub epoch: Epoch,
    pub when: ProposalEpoch,
    pub is_current_slot: bool,
    /// Whether the proposer is in the tracked validator set.
    pub tracked: bool,
}

#[derive(Default)]
struct State {
    validator_set: ValidatorSet,
    epochs: BTreeMap<Epoch, DutySet>,
}

/// Duties of the current and next epoch, fetched at most once per epoch.
#[derive(Default)]
pub struct DutyCache {
    state: Mutex<State>,
}

impl DutyCache {
    /// Makes sure duties for `current_epoch` and the epoch after it are cached.
    ///
    /// Epochs that fail to load are left out and fetched again on the next call.
    /// Epochs before `current_epoch` are evicted.
    ///
    /// Concurrent calls that find the same epoch missing may both fetch it.
    /// The first result to arrive is kept.
    pub async fn ensure_duties(
        &self,
        api: &BeaconApi,
        validator_set: &ValidatorSet,
        current_epoch: Epoch,
    ) {
        let missing_epochs = {
            let mut state = self.state.lock();

            if state.validator_set != *validator_set {
                debug_with_slot!("validator set changed to {validator_set}, clearing duties");
                state.validator_set = validator_set.clone();
                state.epochs.clear();
            }

            [current_epoch, current_epoch + 1]
                .into_iter()
                .filter(|epoch| !state.epochs.contains_key(epoch))
                .collect::<Vec<_>>()
        };

        let fetched = future::join_all(missing_epochs.into_iter().map(|epoch| async move {
            (epoch, fetch_duty_set(api, validator_set, epoch).await)
        }))
        .await;

        let mut state = self.state.lock();

        for (epoch, result) in fetched {
            match result {
                Ok(duty_set) if state.validator_set == *validator_set => {
                    state.epochs.entry(epoch).or_insert(duty_set);
                }
                Ok(_) => debug_with_slot!("discarding duties for epoch {epoch} of a stale set"),
                Err(error) => {
                    warn_with_slot!("failed to fetch duties for epoch {epoch}: {error:?}");
                }
            }
        }

        state.epochs = state.epochs.split_off(&current_epoch);
    }

    #[must_use]
    pub fn cached_epochs(&self) -> Vec<Epoch> {
        self.state.lock().epochs.keys().copied().collect()
    }

    /// Proposer slots of `validator_set` and attester slots across `epochs`.
    #[must_use]
    pub fn combined_duties(
        &self,
        epochs: impl IntoIterator<Item = Epoch>,
        validator_set: &ValidatorSet,
    ) -> CombinedDuties {
        let state = self.state.lock();
        let mut combined = CombinedDuties::default();

        for duty_set in epochs
            .into_iter()
            .filter_map(|epoch| state.epochs.get(&epoch))
        {
            combined.proposer.extend(
                duty_set
                    .proposer_duties
                    .iter()
                    .filter(|(_, validator_index)| validator_set.contains(*validator_index)),
            );

            if state.validator_set == *validator_set {
                combined.attester.extend(&duty_set.attester_duties);
            }
        }

        combined
    }

    /// Every scheduled proposer of the current and next epoch, in slot order.
    #[must_use]
    pub fn upcoming_proposers(
        &self,
        validator_set: &ValidatorSet,
        current_slot: Slot,
        config: &ChainConfig,
    ) -> Vec<ProposerInfo> {
        let current_epoch = config.epoch_at_slot(current_slot);
        let state = self.state.lock();

        [
            (current_epoch, ProposalEpoch::CurrentEpoch),
            (current_epoch + 1, ProposalEpoch::NextEpoch),
        ]
        .into_iter()
        .filter_map(|(epoch, when)| Some((epoch, when, state.epochs.get(&epoch)?)))
        .flat_map(|(epoch, when, duty_set)| {
            duty_set
                .proposer_duties
                .iter()
                .map(move |(slot, validator_index)| ProposerInfo {
                    slot: *slot,
                    validator_index: *validator_index,
                    epoch,
                    when,
                    is_current_slot: *slot == current_slot,
                    tracked: validator_set.contains(validator_index),
                })
        })
        .collect()
    }
}

async fn fetch_duty_set(
    api: &BeaconApi,
    validator_set: &ValidatorSet,
    epoch: Epoch,
) -> Result<DutySet> {
    let attester_duties = async {
        if validator_set.is_empty() {
            return Ok(vec![]);
        }

        api.attester_duties(epoch, validator_set).await
    };

    let (proposer_duties, attester_duties) =
        futures::try_join!(api.proposer_duties(epoch), attester_duties)?;

    Ok(DutySet {
        proposer_duties: proposer_duties
            .into_iter()
            .map(|duty| (duty.slot, duty.validator_index))
            .collect(),
        attester_duties: attester_duties.into_iter().map(|duty| duty.slot).collect(),
    })
}
