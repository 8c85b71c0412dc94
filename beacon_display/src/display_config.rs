use beacon_api::BeaconApiConfig;
use chain_state::Config as ChainStateConfig;
use data_feeds::{L2Config, LabConfig};
use logging::info_with_slot;
use types::validator_set::ValidatorSet;

#[cfg_attr(test, derive(Debug))]
pub struct BeaconDisplayConfig {
    pub beacon_api_config: BeaconApiConfig,
    pub chain_state_config: ChainStateConfig,
    pub validator_set: ValidatorSet,
    pub lab_config: Option<LabConfig>,
    pub l2_config: Option<L2Config>,
}

impl BeaconDisplayConfig {
    pub fn report(&self) {
        let Self {
            beacon_api_config,
            chain_state_config,
            validator_set,
            lab_config,
            l2_config,
        } = self;

        info_with_slot!("beacon node: {}", beacon_api_config.url);
        info_with_slot!("tracked validators: {validator_set}");

        info_with_slot!(
            "dashboard window: {} epochs behind, {} epochs ahead",
            chain_state_config.window.epochs_behind,
            chain_state_config.window.epochs_ahead,
        );

        match lab_config {
            Some(config) => info_with_slot!("Lab slot data: {} ({})", config.url, config.network),
            None => info_with_slot!("Lab slot data: disabled"),
        }

        match l2_config {
            Some(config) => info_with_slot!("L2 metrics: {}", config.url),
            None => info_with_slot!("L2 metrics: disabled"),
        }
    }
}
