//! Dashboard metrics derived from beacon node data.

use core::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Result;
use beacon_api::{AttestationRewards, BeaconApi, ValidatorStatus};
use futures::future;
use logging::warn_with_slot;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use types::{
    primitives::{Epoch, Slot},
    slot::SlotRecord,
    validator_set::ValidatorSet,
};

const EXECUTION_PAYLOAD_POINTER: &str = "/data/message/body/execution_payload";

/// Attestation rewards of recent epochs.
///
/// Rewards are keyed by epoch only. Entries are not valid for a different validator set.
pub struct RewardsCache {
    rewards: Mutex<LruCache<Epoch, Arc<AttestationRewards>>>,
}

impl RewardsCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            rewards: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get_or_fetch(
        &self,
        api: &BeaconApi,
        epoch: Epoch,
        validator_set: &ValidatorSet,
    ) -> Result<Arc<AttestationRewards>> {
        if let Some(rewards) = self.rewards.lock().get(&epoch) {
            return Ok(Arc::clone(rewards));
        }

        let rewards = Arc::new(api.attestation_rewards(epoch, validator_set).await?);

        self.rewards.lock().put(epoch, Arc::clone(&rewards));

        Ok(rewards)
    }

    #[must_use]
    pub fn cached_epochs(&self) -> Vec<Epoch> {
        self.rewards.lock().iter().map(|(epoch, _)| *epoch).collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize)]
pub struct ValidatorStatusSummary {
    pub total: usize,
    pub active: usize,
}

/// Looks up every validator concurrently. Failed lookups count as [`ValidatorStatus::Unknown`].
pub async fn validator_status_summary(
    api: &BeaconApi,
    validator_set: &ValidatorSet,
) -> ValidatorStatusSummary {
    let statuses = future::join_all(validator_set.iter().map(|validator_index| async move {
        match api.validator(*validator_index).await {
            Ok(response) => response.status,
            Err(error) => {
                warn_with_slot!("failed to fetch validator {validator_index}: {error:?}");
                ValidatorStatus::Unknown
            }
        }
    }))
    .await;

    ValidatorStatusSummary {
        total: validator_set.len(),
        active: statuses
            .into_iter()
            .filter(|status| *status == ValidatorStatus::ActiveOngoing)
            .count(),
    }
}

#[serde_as]
#[derive(Deserialize)]
struct ExecutionPayloadSummary {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    block_number: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    gas_used: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    gas_limit: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    base_fee_per_gas: u128,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ExecutionMetrics {
    pub slot: Slot,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transaction_count: usize,
    pub base_fee_per_gas: u128,
}

impl ExecutionMetrics {
    /// Extracts metrics from a `/eth/v2/beacon/blocks/{slot}` response.
    ///
    /// Returns `None` for blocks without an execution payload (before the merge) and for payloads
    /// that cannot be parsed.
    #[must_use]
    pub fn from_block(slot: Slot, block: &Value) -> Option<Self> {
        let payload = block.pointer(EXECUTION_PAYLOAD_POINTER)?;

        let summary = ExecutionPayloadSummary::deserialize(payload)
            .inspect_err(|error| {
                warn_with_slot!("execution payload of slot {slot} is malformed: {error}");
            })
            .ok()?;

        Some(Self {
            slot,
            block_number: summary.block_number,
            gas_used: summary.gas_used,
            gas_limit: summary.gas_limit,
            transaction_count: summary.transactions.len(),
            base_fee_per_gas: summary.base_fee_per_gas,
        })
    }

    #[must_use]
    pub fn from_records(records: &[SlotRecord]) -> Vec<Self> {
        records
            .iter()
            .filter_map(|record| Self::from_block(record.slot, record.block_payload.as_deref()?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use beacon_api::BeaconApiConfig;
    use httpmock::{Method, MockServer};
    use nonzero_ext::nonzero;
    use reqwest::Client;
    use serde_json::json;
    use types::slot::SlotStatus;

    use super::*;

    fn api(server: &MockServer) -> Result<BeaconApi> {
        let url = server.url("/").parse()?;
        Ok(BeaconApi::new(Client::new(), BeaconApiConfig::new(url)))
    }

    fn block(slot: Slot, gas_used: u64, transactions: usize) -> Value {
        json!({
            "version": "deneb",
            "data": {
                "message": {
                    "slot": slot.to_string(),
                    "body": {
                        "execution_payload": {
                            "block_number": (slot + 1000).to_string(),
                            "gas_used": gas_used.to_string(),
                            "gas_limit": "30000000",
                            "base_fee_per_gas": "7000000000",
                            "transactions": vec!["0x02"; transactions],
                        },
                    },
                },
            },
        })
    }

    #[test]
    fn execution_metrics_from_cached_records() {
        let records = [
            SlotRecord::proposed(10, Arc::new(block(10, 15_000_000, 3))),
            SlotRecord::new(11, SlotStatus::Missing),
            SlotRecord::proposed(12, Arc::new(json!({"data": {"message": {"body": {}}}}))),
        ];

        let metrics = ExecutionMetrics::from_records(&records);

        assert_eq!(
            metrics,
            [ExecutionMetrics {
                slot: 10,
                block_number: 1010,
                gas_used: 15_000_000,
                gas_limit: 30_000_000,
                transaction_count: 3,
                base_fee_per_gas: 7_000_000_000,
            }],
        );
    }

    #[tokio::test]
    async fn status_summary_counts_active_validators() -> Result<()> {
        let server = MockServer::start();

        let statuses = [
            (1, "active_ongoing"),
            (2, "active_exiting"),
            (3, "active_ongoing"),
        ];

        for (index, status) in statuses {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path(format!("/eth/v1/beacon/states/head/validators/{index}"));
                then.status(200).json_body(json!({
                    "execution_optimistic": false,
                    "data": {"index": index.to_string(), "balance": "32000000000", "status": status},
                }));
            });
        }

        server.mock(|when, then| {
            when.method(Method::GET)
                .path("/eth/v1/beacon/states/head/validators/4");
            then.status(404)
                .json_body(json!({"code": 404, "message": "validator not found"}));
        });

        let validator_set = [1, 2, 3, 4].into_iter().collect();
        let summary = validator_status_summary(&api(&server)?, &validator_set).await;

        assert_eq!(summary, ValidatorStatusSummary { total: 4, active: 2 });

        Ok(())
    }

    #[tokio::test]
    async fn rewards_are_cached_by_epoch() -> Result<()> {
        let server = MockServer::start();

        let mocks = [5, 6, 7].map(|epoch| {
            server.mock(|when, then| {
                when.method(Method::POST)
                    .path(format!("/eth/v1/beacon/rewards/attestations/{epoch}"));
                then.status(200).json_body(json!({
                    "execution_optimistic": false,
                    "finalized": true,
                    "data": {
                        "ideal_rewards": [],
                        "total_rewards": [{
                            "validator_index": "1",
                            "head": "2000",
                            "target": "4000",
                            "source": "2000",
                            "inactivity": "0",
                        }],
                    },
                }));
            })
        });

        let api = api(&server)?;
        let cache = RewardsCache::new(nonzero!(2_usize));
        let validator_set = [1].into_iter().collect();

        let rewards = cache.get_or_fetch(&api, 5, &validator_set).await?;
        cache.get_or_fetch(&api, 5, &validator_set).await?;
        cache.get_or_fetch(&api, 6, &validator_set).await?;
        cache.get_or_fetch(&api, 7, &validator_set).await?;
        cache.get_or_fetch(&api, 5, &validator_set).await?;

        assert_eq!(rewards.total_rewards[0].total(), 8000);

        let [epoch_5, epoch_6, epoch_7] = mocks;

        epoch_5.assert_hits(2);
        epoch_6.assert_hits(1);
        epoch_7.assert_hits(1);

        Ok(())
    }
}
