use core::{cmp::Reverse, convert::Infallible, num::NonZeroUsize, time::Duration};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use anyhow::Result;
use clock::SlotClock;
use logging::{debug_with_slot, info_with_slot, warn_with_slot};
use mime::APPLICATION_JSON;
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use reqwest::{header::ACCEPT, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tokio::time::Instant;
use types::{primitives::Slot, redacting_url::RedactingUrl};

use crate::FeedError;

const FEED_NAME: &str = "Lab API";
const UNKNOWN_ENTITY: &str = "unknown";
const MAX_ENTITY_LENGTH: usize = 10;
const OUTLIER_FACTOR: i64 = 3;

pub const DEFAULT_LAB_URL: &str = concat!(
    "https://lab-api.primary.production.platform.ethpandaops.io",
    "/lab-data/api/labapi.LabAPI/GetSlotData",
);
pub const DEFAULT_LAB_NETWORK: &str = "mainnet";
pub const DEFAULT_LAB_POLL_INTERVAL: Duration = Duration::from_secs(12);
pub const DEFAULT_LAB_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LAB_SLOT_OFFSET: u64 = 3;
pub const DEFAULT_LAB_HISTORY_CAPACITY: NonZeroUsize = nonzero!(16_usize);

#[derive(Clone, Debug)]
pub struct LabConfig {
    pub url: RedactingUrl,
    pub network: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// How many slots behind the wall clock to ask for. Lab data lags a few slots behind.
    pub slot_offset: u64,
    pub history_capacity: NonZeroUsize,
}

impl LabConfig {
    #[must_use]
    pub fn new(url: RedactingUrl) -> Self {
        Self {
            url,
            network: DEFAULT_LAB_NETWORK.to_owned(),
            poll_interval: DEFAULT_LAB_POLL_INTERVAL,
            request_timeout: DEFAULT_LAB_REQUEST_TIMEOUT,
            slot_offset: DEFAULT_LAB_SLOT_OFFSET,
            history_capacity: DEFAULT_LAB_HISTORY_CAPACITY,
        }
    }
}

#[derive(Deserialize)]
struct LabResponse {
    data: Option<SlotData>,
}

/// The parts of a `GetSlotData` payload the dashboard reads.
#[serde_as]
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct SlotData {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub slot: Slot,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub block: Option<BlockSummary>,
    #[serde(default)]
    pub relay_bids: Option<BTreeMap<String, RelayBids>>,
    #[serde(default)]
    pub timings: Option<Timings>,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct BlockSummary {
    #[serde(default)]
    pub execution_payload_block_hash: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct RelayBids {
    #[serde(default)]
    pub bids: Vec<Bid>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Bid {
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Timings {
    /// Milliseconds into the slot at which each node saw the block.
    /// Values are numbers or numeric strings.
    #[serde(default)]
    pub block_seen: Option<BTreeMap<String, Value>>,
}

impl SlotData {
    /// The value of the relay bid that won the slot.
    #[must_use]
    pub fn winning_bid_value(&self) -> Option<String> {
        let block_hash = self.block.as_ref()?.execution_payload_block_hash.as_deref()?;

        self.relay_bids
            .iter()
            .flat_map(BTreeMap::values)
            .flat_map(|relay| &relay.bids)
            .find(|bid| bid.block_hash.as_deref() == Some(block_hash))
            .and_then(|bid| match bid.value.as_ref()? {
                Value::String(value) => Some(value.clone()),
                Value::Number(value) => Some(value.to_string()),
                _ => None,
            })
    }

    /// Block propagation times across the nodes that reported the block.
    ///
    /// Values of three times the median or more are dropped as outliers.
    /// `nodes_count` still counts them.
    #[must_use]
    pub fn arrival_times(&self) -> Option<ArrivalTimes> {
        let block_seen = self.timings.as_ref()?.block_seen.as_ref()?;

        let mut values = block_seen
            .values()
            .filter_map(arrival_millis)
            .collect::<Vec<_>>();

        values.sort_unstable();

        let median = *values.get(values.len() / 2)?;
        let mut filtered = values
            .iter()
            .copied()
            .filter(|value| *value < median.saturating_mul(OUTLIER_FACTOR));

        let fastest = filtered.next()?;
        let slowest = filtered.last().unwrap_or(fastest);

        Some(ArrivalTimes {
            fastest,
            slowest,
            nodes_count: values.len(),
        })
    }

    fn history_entry(&self) -> SlotHistoryEntry {
        SlotHistoryEntry {
            slot: self.slot,
            entity: clean_entity_name(self.entity.as_deref().unwrap_or_default()),
            bid_value: self.winning_bid_value(),
            arrival_times: self.arrival_times(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ArrivalTimes {
    pub fastest: i64,
    pub slowest: i64,
    pub nodes_count: usize,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct SlotHistoryEntry {
    pub slot: Slot,
    pub entity: String,
    pub bid_value: Option<String>,
    pub arrival_times: Option<ArrivalTimes>,
}

#[derive(Default)]
struct State {
    latest: Option<Arc<SlotData>>,
    updated_at: Option<Instant>,
    payloads: VecDeque<Arc<SlotData>>,
}

/// Client for the ethPandaOps Lab `GetSlotData` endpoint.
///
/// Requests are throttled to one per poll interval. Failed requests keep the data of the last
/// successful one.
pub struct LabClient {
    client: Client,
    config: LabConfig,
    state: Mutex<State>,
}

impl LabClient {
    #[must_use]
    pub fn new(client: Client, config: LabConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::default(),
        }
    }

    /// Refreshes slot data on every slot, relying on [`Self::refresh`] to throttle requests.
    ///
    /// This never returns `Ok`. It is meant to be restarted by a supervisor.
    pub async fn poll(&self, clock: &SlotClock) -> Result<Infallible> {
        loop {
            self.refresh(clock.current_slot()?).await;

            let (_, delay) = clock.time_until_next_slot()?;

            tokio::time::sleep(delay).await;
        }
    }

    /// Fetches data for the slot `slot_offset` slots before `current_slot` unless the last
    /// successful fetch is more recent than the poll interval.
    ///
    /// Returns the latest known slot data.
    pub async fn refresh(&self, current_slot: Slot) -> Option<Arc<SlotData>> {
        let updated_at = self.state.lock().updated_at;

        if updated_at.is_some_and(|instant| instant.elapsed() < self.config.poll_interval) {
            return self.latest();
        }

        let slot = current_slot.saturating_sub(self.config.slot_offset);

        match self.fetch_slot_data(slot).await {
            Ok(slot_data) => {
                info_with_slot!("updated Lab slot data for slot {slot}");
                self.record(slot_data);
            }
            Err(error) => {
                warn_with_slot!("failed to fetch Lab slot data for slot {slot}: {error:?}");
            }
        }

        self.latest()
    }

    pub async fn fetch_slot_data(&self, slot: Slot) -> Result<SlotData> {
        let message = json!({
            "network": self.config.network,
            "slot": slot.to_string(),
        });

        let mut url = self.config.url.as_url().clone();

        url.query_pairs_mut()
            .append_pair("connect", "v1")
            .append_pair("encoding", "json")
            .append_pair("message", &message.to_string());

        debug_with_slot!("GET {} for slot {slot}", self.config.url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, APPLICATION_JSON.as_ref())
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let response = crate::ensure_ok(FEED_NAME, response)?;

        let slot_data = response
            .json::<LabResponse>()
            .await?
            .data
            .ok_or(FeedError::EmptyResponse { feed: FEED_NAME })?;

        Ok(slot_data)
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<SlotData>> {
        self.state.lock().latest.clone()
    }

    /// Summaries of the most recent distinct slots, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<SlotHistoryEntry> {
        let mut history = self
            .state
            .lock()
            .payloads
            .iter()
            .map(|slot_data| slot_data.history_entry())
            .collect::<Vec<_>>();

        history.sort_by_key(|entry| Reverse(entry.slot));

        history
    }

    fn record(&self, slot_data: SlotData) {
        let slot_data = Arc::new(slot_data);
        let mut state = self.state.lock();

        let is_new_slot = state
            .latest
            .as_ref()
            .is_none_or(|latest| latest.slot != slot_data.slot);

        if is_new_slot {
            if state.payloads.len() == self.config.history_capacity.get() {
                state.payloads.pop_front();
            }

            state.payloads.push_back(Arc::clone(&slot_data));
        }

        state.latest = Some(slot_data);
        state.updated_at = Some(Instant::now());
    }
}

/// Shortens staking entity names to fit the display.
#[must_use]
pub fn clean_entity_name(entity: &str) -> String {
    let entity = ["validators", "Validators", "staking", "Staking"]
        .into_iter()
        .fold(entity.to_owned(), |entity, word| entity.replace(word, ""));

    let entity = entity.trim();

    if entity.is_empty() {
        return UNKNOWN_ENTITY.to_owned();
    }

    let entity = if entity.chars().count() <= 3 {
        entity.to_uppercase()
    } else {
        title_case(entity)
    };

    if entity.chars().count() > MAX_ENTITY_LENGTH {
        let mut truncated = entity.chars().take(MAX_ENTITY_LENGTH - 1).collect::<String>();
        truncated.push('.');
        return truncated;
    }

    entity
}

// Uppercases letters that follow a non-letter and lowercases the rest.
fn title_case(string: &str) -> String {
    let mut title = String::with_capacity(string.len());
    let mut after_letter = false;

    for character in string.chars() {
        if after_letter {
            title.extend(character.to_lowercase());
        } else {
            title.extend(character.to_uppercase());
        }

        after_letter = character.is_alphabetic();
    }

    title
}

fn arrival_millis(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(truncate))?,
        Value::String(string) => {
            let string = string.trim().replace(',', "");

            if !string.bytes().all(|byte| byte.is_ascii_digit() || byte == b'.') {
                return None;
            }

            truncate(string.parse().ok()?)
        }
        _ => return None,
    };

    Some(millis)
}

fn truncate(value: f64) -> i64 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "arrival times are milliseconds within a slot"
    )]
    let truncated = value.trunc() as i64;

    truncated
}

#[cfg(test)]
mod tests {
    use httpmock::{Method, Mock, MockServer};
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    const WINNING_HASH: &str = "0x5f2b9a7e1c6d";

    fn slot_payload(slot: Slot, entity: &str) -> Value {
        json!({
            "slot": slot.to_string(),
            "network": "mainnet",
            "entity": entity,
            "block": {"execution_payload_block_hash": WINNING_HASH},
            "relay_bids": {
                "flashbots": {
                    "bids": [
                        {"block_hash": "0x0000", "value": "1000"},
                        {"block_hash": WINNING_HASH, "value": "45210000000000000"},
                    ],
                },
            },
            "timings": {
                "block_seen": {
                    "node-a": 1200,
                    "node-b": "1500",
                    "node-c": 1800.7,
                    "node-d": "2,100",
                    "node-e": 9000,
                },
            },
        })
    }

    fn mock_slot<'a>(server: &'a MockServer, slot: Slot, entity: &str) -> Mock<'a> {
        server.mock(|when, then| {
            when.method(Method::GET)
                .path("/GetSlotData")
                .query_param("connect", "v1")
                .query_param("encoding", "json")
                .query_param(
                    "message",
                    format!("{{\"network\":\"mainnet\",\"slot\":\"{slot}\"}}"),
                );
            then.status(200)
                .json_body(json!({"data": slot_payload(slot, entity)}));
        })
    }

    fn lab_client(server: &MockServer) -> Result<LabClient> {
        let config = LabConfig::new(server.url("/GetSlotData").parse()?);
        Ok(LabClient::new(Client::new(), config))
    }

    #[test_case("Lido", "Lido")]
    #[test_case("coinbase validators", "Coinbase")]
    #[test_case("abc", "ABC")]
    #[test_case("kiln-finance", "Kiln-Fina.")]
    #[test_case("everstake", "Everstake")]
    #[test_case("rocketpool staking", "Rocketpool")]
    #[test_case("Bitcoin Suisse", "Bitcoin S.")]
    #[test_case("", "unknown")]
    #[test_case("Staking", "unknown")]
    fn entity_names_are_shortened(entity: &str, expected: &str) {
        assert_eq!(clean_entity_name(entity), expected);
    }

    #[test]
    fn payload_is_summarized() -> Result<()> {
        let slot_data = serde_json::from_value::<SlotData>(slot_payload(97, "lido"))?;

        assert_eq!(
            slot_data.history_entry(),
            SlotHistoryEntry {
                slot: 97,
                entity: "Lido".to_owned(),
                bid_value: Some("45210000000000000".to_owned()),
                arrival_times: Some(ArrivalTimes {
                    fastest: 1200,
                    slowest: 2100,
                    nodes_count: 5,
                }),
            },
        );

        Ok(())
    }

    #[test]
    fn missing_sections_are_tolerated() -> Result<()> {
        let slot_data = serde_json::from_value::<SlotData>(json!({
            "slot": 98,
            "relay_bids": null,
            "timings": {"block_seen": {}},
        }))?;

        assert_eq!(
            slot_data.history_entry(),
            SlotHistoryEntry {
                slot: 98,
                entity: "unknown".to_owned(),
                bid_value: None,
                arrival_times: None,
            },
        );

        Ok(())
    }

    #[tokio::test]
    async fn requests_are_throttled() -> Result<()> {
        let server = MockServer::start();

        let slot_97 = mock_slot(&server, 97, "lido");
        let slot_98 = mock_slot(&server, 98, "coinbase");

        let client = lab_client(&server)?;

        assert_eq!(client.refresh(100).await.map(|data| data.slot), Some(97));

        // Within the poll interval the previous data is returned without a request.
        assert_eq!(client.refresh(101).await.map(|data| data.slot), Some(97));

        slot_97.assert_hits(1);
        slot_98.assert_hits(0);

        Ok(())
    }

    #[tokio::test]
    async fn history_keeps_distinct_recent_slots_newest_first() -> Result<()> {
        let server = MockServer::start();

        for slot in 0..20 {
            mock_slot(&server, slot, if slot % 2 == 0 { "lido" } else { "coinbase" });
        }

        let mut config = LabConfig::new(server.url("/GetSlotData").parse()?);
        config.poll_interval = Duration::ZERO;

        let client = LabClient::new(Client::new(), config);

        for current_slot in [3, 3].into_iter().chain(3..23) {
            client.refresh(current_slot).await;
        }

        let history = client.history();

        assert_eq!(
            history.iter().map(|entry| entry.slot).collect::<Vec<_>>(),
            (4..20).rev().collect::<Vec<_>>(),
        );

        assert_eq!(history[0].entity, "Coinbase");
        assert_eq!(history[1].entity, "Lido");

        Ok(())
    }

    #[tokio::test]
    async fn failures_keep_previous_data() -> Result<()> {
        let server = MockServer::start();

        mock_slot(&server, 97, "lido");

        server.mock(|when, then| {
            when.method(Method::GET).path("/GetSlotData").query_param(
                "message",
                "{\"network\":\"mainnet\",\"slot\":\"98\"}",
            );
            then.status(503).body("unavailable");
        });

        let mut config = LabConfig::new(server.url("/GetSlotData").parse()?);
        config.poll_interval = Duration::ZERO;

        let client = LabClient::new(Client::new(), config);

        client.refresh(100).await;

        assert_eq!(client.refresh(101).await.map(|data| data.slot), Some(97));
        assert_eq!(client.history().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn empty_responses_are_errors() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/GetSlotData");
            then.status(200).json_body(json!({"data": null}));
        });

        let error = lab_client(&server)?
            .fetch_slot_data(5)
            .await
            .expect_err("response has no data");

        assert_eq!(
            error.downcast::<FeedError>()?,
            FeedError::EmptyResponse { feed: FEED_NAME },
        );

        Ok(())
    }
}
