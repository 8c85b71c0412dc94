pub use crate::{
    api::{BeaconApi, BeaconApiError},
    config::{Config as BeaconApiConfig, DEFAULT_REQUEST_TIMEOUT},
    responses::{
        AttestationRewards, AttesterDuty, Checkpoint, FinalityCheckpoints, Genesis, HeadEvent,
        ProposerDuty, Spec, TotalReward, ValidatorResponse, ValidatorStatus,
    },
};

mod api;
mod config;
mod responses;
