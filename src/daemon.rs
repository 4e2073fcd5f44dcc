use std::sync::Arc;

use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info};

use crate::{advertiser::Advertiser, config::Config, error::Error};

/// Production advertisers for every configured interface.
pub fn from_config(config: &Config) -> Result<Vec<Advertiser>, Error> {
    config
        .interfaces
        .iter()
        .map(|ifi| Advertiser::new(ifi.clone()))
        .collect()
}

/// Run all advertisers until `true` is sent on `shutdown` or one of them
/// fails, in which case this sends it to shut the rest down. Every failure
/// is reported.
pub async fn run(
    advertisers: Vec<Advertiser>,
    shutdown: Arc<watch::Sender<bool>>,
) -> Result<(), Error> {
    let mut tasks = JoinSet::new();
    for ad in advertisers {
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let res = ad.advertise(shutdown.subscribe()).await;
            if let Err(e) = &res {
                error!(iface = ad.name(), "advertiser failed: {e}");
                shutdown.send_replace(true);
            }
            res
        });
    }
    info!(count = tasks.len(), "advertisers running");

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(e),
            Err(e) => {
                shutdown.send_replace(true);
                errors.push(Error::Task(e));
            }
        }
    }

    Error::join(errors)
}
