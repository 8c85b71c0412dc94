use core::{
    convert::Infallible,
    pin::pin,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{collections::HashMap, io, sync::Arc};

use anyhow::{bail, Result};
use clock::{TimeSource, Timespec};
use event_stream::ServerSentEvent;
use futures::{StreamExt as _, TryStreamExt as _};
use logging::{debug_with_slot, info_with_slot, warn_with_slot};
use mime::TEXT_EVENT_STREAM;
use parking_lot::RwLock;
use reqwest::{header::ACCEPT, Client};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use types::redacting_url::RedactingUrl;

const FEED_NAME: &str = "L2 metrics stream";

pub const DEFAULT_L2_URL: &str = "https://tracker-api-gdesfolyga-uw.a.run.app/sse";
pub const DEFAULT_L2_RECONNECT_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_L2_TOP_COUNT: usize = 10;

#[derive(Clone, Debug)]
pub struct L2Config {
    pub url: RedactingUrl,
    pub reconnect_delay: Duration,
    pub top_count: usize,
}

impl L2Config {
    #[must_use]
    pub const fn new(url: RedactingUrl) -> Self {
        Self {
            url,
            reconnect_delay: DEFAULT_L2_RECONNECT_DELAY,
            top_count: DEFAULT_L2_TOP_COUNT,
        }
    }
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainUpdate {
    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    tps: f64,
    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    gas_count: u64,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct L2Metrics {
    pub name: String,
    pub tps: f64,
    pub gas_used: u64,
    pub last_updated: Timespec,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct L2Summary {
    pub total_tps: f64,
    pub total_gas: u64,
    pub top: Vec<L2Metrics>,
    pub connected: bool,
}

/// Latest throughput of every layer 2 chain seen on the stream.
///
/// Each event names a chain and replaces its previous metrics.
pub struct L2MetricsTracker {
    client: Client,
    config: L2Config,
    time_source: Arc<dyn TimeSource>,
    metrics: RwLock<HashMap<String, L2Metrics>>,
    connected: AtomicBool,
}

impl L2MetricsTracker {
    #[must_use]
    pub fn new(client: Client, config: L2Config, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            client,
            config,
            time_source,
            metrics: RwLock::default(),
            connected: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &L2Config {
        &self.config
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Applies updates from the stream until it fails or ends.
    ///
    /// This never returns `Ok`. It is meant to be restarted by a supervisor after
    /// [`L2Config::reconnect_delay`].
    pub async fn follow_metrics(&self) -> Result<Infallible> {
        let result = self.stream_metrics().await;

        self.connected.store(false, Ordering::Relaxed);

        result
    }

    async fn stream_metrics(&self) -> Result<Infallible> {
        info_with_slot!("connecting to {FEED_NAME} at {}", self.config.url);

        let response = self
            .client
            .get(self.config.url.as_url().clone())
            .header(ACCEPT, TEXT_EVENT_STREAM.as_ref())
            .send()
            .await?;

        let response = crate::ensure_ok(FEED_NAME, response)?;
        let body = response.bytes_stream().map_err(io::Error::other);
        let mut events = pin!(event_stream::server_sent_events(body));

        info_with_slot!("connected to {FEED_NAME}");

        self.connected.store(true, Ordering::Relaxed);

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(error) if error.is_fatal() => return Err(error.into()),
                Err(error) => {
                    warn_with_slot!("skipping malformed L2 metrics line: {error}");
                    continue;
                }
            };

            if let Err(error) = self.process_event(&event) {
                warn_with_slot!("skipping malformed L2 metrics event: {error:?}");
            }
        }

        bail!("{FEED_NAME} ended")
    }

    pub(crate) fn process_event(&self, event: &ServerSentEvent) -> Result<()> {
        let Some(name) = event.event.as_deref() else {
            bail!("event without a chain name: {:?}", event.data);
        };

        let update = serde_json::from_str::<ChainUpdate>(&event.data)?;

        let metrics = L2Metrics {
            name: name.to_owned(),
            tps: update.tps,
            gas_used: update.gas_count,
            last_updated: self.time_source.now()?,
        };

        self.metrics.write().insert(name.to_owned(), metrics);

        debug_with_slot!(
            "updated L2 metrics for {name} (total TPS: {:.2}, total gas: {})",
            self.total_tps(),
            self.total_gas(),
        );

        Ok(())
    }

    #[must_use]
    pub fn total_tps(&self) -> f64 {
        self.metrics.read().values().map(|metrics| metrics.tps).sum()
    }

    #[must_use]
    pub fn total_gas(&self) -> u64 {
        self.metrics
            .read()
            .values()
            .map(|metrics| metrics.gas_used)
            .fold(0, u64::saturating_add)
    }

    /// The `count` chains with the highest TPS, busiest first.
    #[must_use]
    pub fn top(&self, count: usize) -> Vec<L2Metrics> {
        let mut metrics = self.metrics.read().values().cloned().collect::<Vec<_>>();

        metrics.sort_by(|left, right| {
            right
                .tps
                .total_cmp(&left.tps)
                .then_with(|| left.name.cmp(&right.name))
        });

        metrics.truncate(count);
        metrics
    }

    #[must_use]
    pub fn summary(&self) -> L2Summary {
        L2Summary {
            total_tps: self.total_tps(),
            total_gas: self.total_gas(),
            top: self.top(self.config.top_count),
            connected: self.is_connected(),
        }
    }
}
