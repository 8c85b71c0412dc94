//! Third-party data shown next to the beacon node data.
//!
//! [`LabClient`] polls per-slot block propagation data from ethPandaOps Lab.
//! [`L2MetricsTracker`] follows throughput of layer 2 chains over server-sent events.

pub use crate::{
    l2::{
        L2Config, L2Metrics, L2MetricsTracker, L2Summary, DEFAULT_L2_RECONNECT_DELAY,
        DEFAULT_L2_TOP_COUNT, DEFAULT_L2_URL,
    },
    lab::{
        clean_entity_name, ArrivalTimes, LabClient, LabConfig, SlotData, SlotHistoryEntry,
        DEFAULT_LAB_HISTORY_CAPACITY, DEFAULT_LAB_NETWORK, DEFAULT_LAB_POLL_INTERVAL,
        DEFAULT_LAB_REQUEST_TIMEOUT, DEFAULT_LAB_SLOT_OFFSET, DEFAULT_LAB_URL,
    },
};

mod l2;
mod lab;

use reqwest::{Response, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum FeedError {
    #[error("{feed} responded without data")]
    EmptyResponse { feed: &'static str },
    #[error("{feed} responded with unexpected status code: {received}")]
    UnexpectedStatusCode {
        feed: &'static str,
        received: StatusCode,
    },
}

fn ensure_ok(feed: &'static str, response: Response) -> Result<Response, FeedError> {
    let received = response.status();

    if received != StatusCode::OK {
        return Err(FeedError::UnexpectedStatusCode { feed, received });
    }

    Ok(response)
}
