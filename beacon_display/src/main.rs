use core::{future::Future, pin::pin};
use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use beacon_api::BeaconApi;
use chain_state::{ChainState, HeadNotification, SlotNotification};
use clap::{Error as ClapError, Parser as _};
use clock::{SystemTimeSource, TimeSource};
use data_feeds::{L2MetricsTracker, LabClient};
use futures::{channel::mpsc, StreamExt as _};
use logging::{error_with_slot, info_with_slot};
use reqwest::Client;
use supervisor::RestartPolicy;
use tokio::runtime::Builder;

use crate::{
    dashboard::{Dashboard, Trigger},
    display_args::BeaconDisplayArgs,
    display_config::BeaconDisplayConfig,
};

mod dashboard;
mod display_args;
mod display_config;

fn main() -> ExitCode {
    if let Err(error) = try_main() {
        error.downcast_ref().map(ClapError::exit);
        error_with_slot!("{error:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn try_main() -> Result<()> {
    binary_utils::initialize_tracing_logger(module_path!(), false)?;

    let config = BeaconDisplayArgs::try_parse()?
        .try_into_config()
        .map_err(BeaconDisplayArgs::clap_error)?;

    info_with_slot!("starting beacon display");
    config.report();

    block_on(run(config))
}

async fn run(config: BeaconDisplayConfig) -> Result<()> {
    let BeaconDisplayConfig {
        beacon_api_config,
        chain_state_config,
        validator_set,
        lab_config,
        l2_config,
    } = config;

    // Requests set their own timeouts. A client-wide one would cut off event streams.
    let client = Client::builder().build()?;
    let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

    let api = BeaconApi::new(client.clone(), beacon_api_config);
    let chain_state =
        ChainState::initialize(api, chain_state_config, Arc::clone(&time_source)).await?;
    let chain_state = Arc::new(chain_state);

    let (trigger_tx, mut trigger_rx) = mpsc::unbounded();

    chain_state.register_head_listener({
        let trigger_tx = trigger_tx.clone();
        move |notification: &HeadNotification| {
            trigger_tx.unbounded_send(Trigger::Head(notification.event.slot))?;
            Ok(())
        }
    });

    chain_state.register_slot_listener(move |notification: &SlotNotification| {
        trigger_tx.unbounded_send(Trigger::Slot(notification.slot))?;
        Ok(())
    });

    let mut tasks = chain_state.spawn_background_tasks();

    let lab_client = lab_config.map(|lab_config| {
        let policy = RestartPolicy::fixed(lab_config.poll_interval);
        let lab_client = Arc::new(LabClient::new(client.clone(), lab_config));

        tasks.spawn("Lab poller", policy, {
            let lab_client = Arc::clone(&lab_client);
            let chain_state = Arc::clone(&chain_state);
            move || {
                let lab_client = Arc::clone(&lab_client);
                let chain_state = Arc::clone(&chain_state);
                async move { lab_client.poll(chain_state.clock()).await }
            }
        });

        lab_client
    });

    let l2_tracker = l2_config.map(|l2_config| {
        let policy = RestartPolicy::fixed(l2_config.reconnect_delay);
        let l2_tracker = Arc::new(L2MetricsTracker::new(client.clone(), l2_config, time_source));

        tasks.spawn("L2 metrics tracker", policy, {
            let l2_tracker = Arc::clone(&l2_tracker);
            move || {
                let l2_tracker = Arc::clone(&l2_tracker);
                async move { l2_tracker.follow_metrics().await }
            }
        });

        l2_tracker
    });

    info_with_slot!("started background tasks: {}", tasks.names().join(", "));

    let mut dashboard = Dashboard::new(chain_state, validator_set, lab_client, l2_tracker);
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());

    dashboard.refresh(Trigger::Startup).await;

    loop {
        tokio::select! {
            trigger = trigger_rx.next() => match trigger {
                Some(trigger) => {
                    dashboard.refresh(trigger).await;
                }
                None => break,
            },
            result = &mut ctrl_c => {
                result?;
                info_with_slot!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    tasks.shutdown().await;

    Ok(())
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}
