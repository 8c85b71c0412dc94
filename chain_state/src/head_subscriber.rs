use core::{convert::Infallible, pin::pin};
use std::sync::Arc;

use anyhow::{bail, Result};
use beacon_api::HeadEvent;
use clock::Timespec;
use event_stream::ServerSentEvent;
use futures::stream::{FuturesUnordered, StreamExt as _};
use logging::{debug_with_slot, info_with_slot, warn_with_slot, SLOT_LOG_METRICS};
use serde::Serialize;
use strum::{AsRefStr, Display};
use types::{
    primitives::Slot,
    slot::{ArrivalSample, SlotRecord},
};

use crate::chain_state::ChainState;

const HEAD_TOPIC: &str = "head";

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, AsRefStr, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HeadStreamState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
}

/// A head event together with how late it arrived relative to the start of its slot.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct HeadNotification {
    #[serde(flatten)]
    pub event: HeadEvent,
    pub arrival_time: f64,
}

impl ChainState {
    #[must_use]
    pub fn head_stream_state(&self) -> HeadStreamState {
        *self.head_stream_state.lock()
    }

    /// Delivers head events until the stream fails or ends.
    ///
    /// This never returns `Ok`. It is meant to be restarted by a supervisor.
    pub async fn follow_head_events(&self) -> Result<Infallible> {
        self.set_head_stream_state(HeadStreamState::Connecting);

        let result = self.stream_head_events().await;

        self.set_head_stream_state(HeadStreamState::Disconnected);

        result
    }

    async fn stream_head_events(&self) -> Result<Infallible> {
        let mut events = pin!(self.api.head_events().await?);

        info_with_slot!("subscribed to head events from {}", self.api.url());

        self.set_head_stream_state(HeadStreamState::Streaming);

        // Block fetches must not hold up reading the stream.
        let mut block_fetches = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                event = events.next() => {
                    let event = match event {
                        Some(Ok(event)) => event,
                        Some(Err(error)) if error.is_fatal() => return Err(error.into()),
                        Some(Err(error)) => {
                            warn_with_slot!("skipping malformed head event line: {error}");
                            continue;
                        }
                        None => break,
                    };

                    let now = self.clock.now()?;

                    let notification = match self.process_head_event(&event, now) {
                        Ok(Some(notification)) => notification,
                        Ok(None) => continue,
                        Err(error) => {
                            warn_with_slot!(
                                "skipping malformed head event {:?}: {error:?}",
                                event.data,
                            );
                            continue;
                        }
                    };

                    debug_with_slot!(
                        "head event for slot {} (block: {:?}, arrival: {:.2} s)",
                        notification.event.slot,
                        notification.event.block,
                        notification.arrival_time,
                    );

                    self.head_listeners.notify(&notification);

                    block_fetches.push(self.cache_head_block(notification.event.slot));
                }
                _ = block_fetches.select_next_some(), if !block_fetches.is_empty() => {}
            }
        }

        while block_fetches.next().await.is_some() {}

        bail!("head event stream ended")
    }

    /// Records a head event and returns the notification to deliver.
    ///
    /// Returns `None` for events of other topics and for events that were already delivered,
    /// which nodes may repeat after a reconnect.
    pub(crate) fn process_head_event(
        &self,
        event: &ServerSentEvent,
        now: Timespec,
    ) -> Result<Option<HeadNotification>> {
        if event.event.as_deref().is_some_and(|name| name != HEAD_TOPIC) {
            return Ok(None);
        }

        let event = serde_json::from_str::<HeadEvent>(&event.data)?;
        let key = (event.slot, event.block);

        if self.delivered_heads.lock().contains(&key) {
            debug_with_slot!("ignoring repeated head event for slot {}", event.slot);
            return Ok(None);
        }

        let arrival_time = self.clock.arrival_time(event.slot, now)?;

        {
            let mut delivered_heads = self.delivered_heads.lock();

            if delivered_heads.len() == self.config.cache.arrival_history_capacity.get() {
                delivered_heads.pop_front();
            }

            delivered_heads.push_back(key);
        }

        self.arrival_history.lock().push(ArrivalSample {
            slot: event.slot,
            arrival_time,
        });

        SLOT_LOG_METRICS.set_head_slot(event.slot);

        Ok(Some(HeadNotification {
            event,
            arrival_time,
        }))
    }

    async fn cache_head_block(&self, slot: Slot) {
        if self.block_cache.contains(slot) {
            return;
        }

        match self.api.block(slot).await {
            Ok(Some(block)) => self
                .block_cache
                .insert(SlotRecord::proposed(slot, Arc::new(block))),
            Ok(None) => debug_with_slot!("block of head slot {slot} is not available yet"),
            Err(error) => warn_with_slot!("failed to fetch block of head slot {slot}: {error:?}"),
        }
    }

    fn set_head_stream_state(&self, state: HeadStreamState) {
        *self.head_stream_state.lock() = state;
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::time::Instant;

    use beacon_api::{BeaconApi, BeaconApiConfig};
    use clock::{FakeTimeSource, SlotClock, TimeSource as _};
    use httpmock::{Method, Mock, MockServer};
    use parking_lot::Mutex;
    use reqwest::Client;
    use serde_json::json;
    use types::{config::ChainConfig, slot::SlotStatus};

    use crate::Config;

    use super::*;

    const BLOCK_10: &str = "0x9a2fefd2fdb57f74993c7780ea5b9030d2897b615b89f808011ca5aebed54eaf";
    const BLOCK_11: &str = "0x600e852a08c1200654ddf11025f1ceacb3c2e74bdd5c630cde0838b2591b69f9";
    const BLOCK_12: &str = "0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95";

    fn head_event(slot: Slot, block: &str) -> String {
        let data = json!({
            "slot": slot.to_string(),
            "block": block,
            "state": BLOCK_10,
            "epoch_transition": false,
            "execution_optimistic": false,
        });

        format!("event: head\ndata: {data}\n\n")
    }

    fn mock_events(server: &MockServer, body: impl AsRef<[u8]>) -> Mock<'_> {
        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/events");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
    }

    fn chain_state(server: &MockServer) -> Result<(ChainState, FakeTimeSource)> {
        let config = ChainConfig::mainnet();
        let slot_10_start = Duration::from_secs(config.genesis_time + 12 * 10);
        let time_source = FakeTimeSource::new(slot_10_start + Duration::from_millis(1_500));

        let url = server.url("/").parse()?;
        let api = BeaconApi::new(Client::new(), BeaconApiConfig::new(url));
        let clock = SlotClock::new(config, Arc::new(time_source.clone()));

        Ok((ChainState::new(api, clock, Config::default()), time_source))
    }

    fn record_slots(chain_state: &ChainState) -> Arc<Mutex<Vec<(Slot, f64)>>> {
        let seen = Arc::new(Mutex::new(vec![]));

        chain_state.register_head_listener({
            let seen = Arc::clone(&seen);
            move |notification| {
                seen.lock()
                    .push((notification.event.slot, notification.arrival_time));
                Ok(())
            }
        });

        seen
    }

    #[tokio::test]
    async fn reconnecting_does_not_repeat_or_lose_events() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path_contains("/eth/v2/beacon/blocks/");
            then.status(200).json_body(json!({"version": "deneb", "data": {}}));
        });

        let body = [head_event(10, BLOCK_10), head_event(11, BLOCK_11)].concat();
        let mut first_connection = mock_events(&server, &body);

        let (chain_state, _) = chain_state(&server)?;
        let seen = record_slots(&chain_state);

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        assert_eq!(chain_state.head_stream_state(), HeadStreamState::Disconnected);

        // The node replays its latest events on the next connection.
        first_connection.delete();

        let body = [head_event(11, BLOCK_11), head_event(12, BLOCK_12)].concat();
        let second_connection = mock_events(&server, &body);

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        second_connection.assert_hits(1);

        assert_eq!(
            *seen.lock(),
            [(10, 1.5), (11, -10.5), (12, -22.5)],
        );

        assert_eq!(
            chain_state
                .arrival_time_history()
                .into_iter()
                .map(|sample| sample.slot)
                .collect::<Vec<_>>(),
            [10, 11, 12],
        );

        for slot in 10..=12 {
            assert_eq!(
                chain_state.block_cache.get(slot).map(|record| record.status),
                Some(SlotStatus::Proposed),
            );
        }

        Ok(())
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path_contains("/eth/v2/beacon/blocks/");
            then.status(404).json_body(json!({"code": 404, "message": "not found"}));
        });

        let body = [
            "event: head\ndata: {\"slot\": \"oops\"}\n\n".to_owned(),
            "event: block\ndata: {}\n\n".to_owned(),
            head_event(10, BLOCK_10),
        ]
        .concat();

        mock_events(&server, &body);

        let (chain_state, _) = chain_state(&server)?;
        let seen = record_slots(&chain_state);

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        assert_eq!(*seen.lock(), [(10, 1.5)]);
        assert!(!chain_state.block_cache.contains(10));

        Ok(())
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_delivery() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path_contains("/eth/v2/beacon/blocks/");
            then.status(200).json_body(json!({"version": "deneb", "data": {}}));
        });

        let body = [head_event(10, BLOCK_10), head_event(11, BLOCK_11)].concat();
        mock_events(&server, &body);

        let (chain_state, _) = chain_state(&server)?;

        chain_state.register_head_listener(|_| bail!("display unreachable"));
        let seen = record_slots(&chain_state);

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        assert_eq!(seen.lock().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn connection_failure_leaves_stream_disconnected() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/events");
            then.status(503).body("not ready");
        });

        let (chain_state, _) = chain_state(&server)?;

        chain_state
            .follow_head_events()
            .await
            .expect_err("503 should fail the subscription");

        assert_eq!(chain_state.head_stream_state(), HeadStreamState::Disconnected);

        Ok(())
    }

    #[tokio::test]
    async fn invalid_lines_do_not_end_the_stream() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path_contains("/eth/v2/beacon/blocks/");
            then.status(200).json_body(json!({"version": "deneb", "data": {}}));
        });

        let mut body = b"event: head\ndata: \xff\xfe\n\n".to_vec();
        body.extend_from_slice(head_event(10, BLOCK_10).as_bytes());
        mock_events(&server, body);

        let (chain_state, _) = chain_state(&server)?;
        let seen = record_slots(&chain_state);

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        assert_eq!(*seen.lock(), [(10, 1.5)]);

        Ok(())
    }

    #[tokio::test]
    async fn slow_block_fetches_do_not_delay_delivery() -> Result<()> {
        let server = MockServer::start();

        let blocks = server.mock(|when, then| {
            when.method(Method::GET).path_contains("/eth/v2/beacon/blocks/");
            then.status(200)
                .delay(Duration::from_secs(2))
                .json_body(json!({"version": "deneb", "data": {}}));
        });

        let body = [head_event(10, BLOCK_10), head_event(11, BLOCK_11)].concat();
        mock_events(&server, body);

        let (chain_state, _) = chain_state(&server)?;
        let delivered_at = Arc::new(Mutex::new(vec![]));

        chain_state.register_head_listener({
            let delivered_at = Arc::clone(&delivered_at);
            move |_| {
                delivered_at.lock().push(Instant::now());
                Ok(())
            }
        });

        chain_state
            .follow_head_events()
            .await
            .expect_err("stream ends after the body");

        let delivered_at = delivered_at.lock().clone();
        let [first, second] = delivered_at.as_slice() else {
            panic!("expected two deliveries, got {}", delivered_at.len());
        };

        assert!(second.duration_since(*first) < Duration::from_secs(1));

        // Pending fetches finish before the subscriber returns.
        blocks.assert_hits(2);
        assert!(chain_state.block_cache.contains(10));
        assert!(chain_state.block_cache.contains(11));

        Ok(())
    }

    #[test]
    fn failed_events_are_not_marked_as_delivered() -> Result<()> {
        let server = MockServer::start();
        let (chain_state, time_source) = chain_state(&server)?;

        let event = ServerSentEvent {
            event: Some(HEAD_TOPIC.to_owned()),
            data: json!({"slot": Slot::MAX.to_string(), "block": BLOCK_10}).to_string(),
        };

        chain_state
            .process_head_event(&event, time_source.now()?)
            .expect_err("start of the slot is out of range");

        assert!(chain_state.delivered_heads.lock().is_empty());
        assert!(chain_state.arrival_time_history().is_empty());

        Ok(())
    }
}
