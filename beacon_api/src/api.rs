use std::io;

use anyhow::{bail, Result};
use event_stream::{EventStreamError, ServerSentEvent};
use futures::stream::{Stream, TryStreamExt as _};
use logging::debug_with_slot;
use mime::TEXT_EVENT_STREAM;
use reqwest::{header::ACCEPT, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use types::{
    config::ChainConfig,
    primitives::{Epoch, Slot, ValidatorIndex},
    redacting_url::RedactingUrl,
    validator_set::ValidatorSet,
};

use crate::{
    config::Config,
    responses::{
        AttestationRewards, AttesterDuty, DataResponse, FinalityCheckpoints, Genesis,
        ProposerDuty, Spec, ValidatorResponse,
    },
};

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum BeaconApiError {
    #[error("bad request to Beacon Node API (beacon node response: {message})")]
    BadRequest { message: String },
    #[error("beacon node internal error (beacon node response: {message})")]
    BeaconNodeInternalError { message: String },
    #[error("received unexpected status code: {received}, expected: {expected}")]
    UnexpectedStatusCode {
        expected: StatusCode,
        received: StatusCode,
    },
}

/// Client for the endpoints of the standard Beacon Node API the dashboard needs.
///
/// The client is cheap to clone. All clones share the connection pool of the [`Client`] passed
/// to [`BeaconApi::new`].
#[derive(Clone)]
pub struct BeaconApi {
    client: Client,
    config: Config,
}

impl BeaconApi {
    #[must_use]
    pub const fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub const fn url(&self) -> &RedactingUrl {
        &self.config.url
    }

    pub async fn spec(&self) -> Result<Spec> {
        self.get("/eth/v1/config/spec").await
    }

    pub async fn genesis(&self) -> Result<Genesis> {
        self.get("/eth/v1/beacon/genesis").await
    }

    pub async fn chain_config(&self) -> Result<ChainConfig> {
        let (spec, genesis) = futures::try_join!(self.spec(), self.genesis())?;

        Ok(ChainConfig {
            seconds_per_slot: spec.seconds_per_slot,
            slots_per_epoch: spec.slots_per_epoch,
            genesis_time: genesis.genesis_time,
        })
    }

    pub async fn finality_checkpoints(&self) -> Result<FinalityCheckpoints> {
        self.get("/eth/v1/beacon/states/head/finality_checkpoints")
            .await
    }

    /// Fetches the block proposed in `slot`.
    ///
    /// Returns the whole response body, including `version` and `execution_optimistic`.
    /// Returns `None` if the node responds with 404, which means the slot is empty or the node
    /// has not seen its block yet.
    pub async fn block(&self, slot: Slot) -> Result<Option<Value>> {
        let url = self.url().join(&format!("/eth/v2/beacon/blocks/{slot}"))?;

        debug_with_slot!("fetching block from {url}");

        let response = self.send(self.client.get(url.into_url())).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = handle_error(response).await?;

        if response.status() != StatusCode::OK {
            bail!(BeaconApiError::UnexpectedStatusCode {
                expected: StatusCode::OK,
                received: response.status(),
            });
        }

        response.json().await.map(Some).map_err(Into::into)
    }

    pub async fn proposer_duties(&self, epoch: Epoch) -> Result<Vec<ProposerDuty>> {
        self.get(&format!("/eth/v1/validator/duties/proposer/{epoch}"))
            .await
    }

    pub async fn attester_duties(
        &self,
        epoch: Epoch,
        validator_set: &ValidatorSet,
    ) -> Result<Vec<AttesterDuty>> {
        self.post(
            &format!("/eth/v1/validator/duties/attester/{epoch}"),
            &validator_set.to_request_body(),
        )
        .await
    }

    pub async fn validator(&self, validator_index: ValidatorIndex) -> Result<ValidatorResponse> {
        self.get(&format!(
            "/eth/v1/beacon/states/head/validators/{validator_index}"
        ))
        .await
    }

    pub async fn attestation_rewards(
        &self,
        epoch: Epoch,
        validator_set: &ValidatorSet,
    ) -> Result<AttestationRewards> {
        self.post(
            &format!("/eth/v1/beacon/rewards/attestations/{epoch}"),
            &validator_set.to_request_body(),
        )
        .await
    }

    /// Opens the `head` event stream.
    ///
    /// The request has no timeout. The stream ends when the node closes the connection or the
    /// returned stream is dropped.
    pub async fn head_events(
        &self,
    ) -> Result<impl Stream<Item = Result<ServerSentEvent, EventStreamError>> + Send> {
        let mut url = self.url().join("/eth/v1/events")?.into_url();
        url.query_pairs_mut().append_pair("topics", "head");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, TEXT_EVENT_STREAM.as_ref())
            .send()
            .await?;

        let response = handle_error(response).await?;

        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(event_stream::server_sent_events(body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url().join(path)?;

        debug_with_slot!("GET {url}");

        let response = self.send(self.client.get(url.into_url())).await?;
        let response = handle_error(response).await?;

        Ok(response.json::<DataResponse<T>>().await?.data)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url().join(path)?;

        debug_with_slot!("POST {url}");

        let response = self
            .send(self.client.post(url.into_url()).json(body))
            .await?;

        let response = handle_error(response).await?;

        Ok(response.json::<DataResponse<T>>().await?.data)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(Into::into)
    }
}

async fn handle_error(response: Response) -> Result<Response> {
    if response.status().is_client_error() {
        let message = response.text().await?;
        bail!(BeaconApiError::BadRequest { message });
    }

    if response.status().is_server_error() {
        let message = response.text().await?;
        bail!(BeaconApiError::BeaconNodeInternalError { message });
    }

    Ok(response)
}
