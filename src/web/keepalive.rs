use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WebConfig;

const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Requests the keep-alive endpoint on a fixed interval so hosting platforms
/// that idle quiet services keep this one running. Never returns unless the
/// HTTP client cannot be built.
pub async fn run_self_ping(config: &WebConfig) -> Result<()> {
    if config.disable_self_ping {
        info!("self-ping disabled");
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(PING_TIMEOUT)
        .build()
        .context("failed to construct self-ping client")?;
    let target = config.self_ping_target();
    let period = Duration::from_secs(config.self_ping_interval_secs.max(1));
    info!("self-ping {} every {}s", target, period.as_secs());

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        ping_once(&client, &target).await;
    }
}

/// One keep-alive request. Failures are logged and otherwise ignored.
pub async fn ping_once(client: &reqwest::Client, target: &str) -> bool {
    match client.get(target).send().await {
        Ok(response) if response.status().is_success() => {
            debug!("self-ping ok");
            true
        }
        Ok(response) => {
            warn!("self-ping returned {}", response.status());
            false
        }
        Err(err) => {
            warn!("self-ping failed: {}", err);
            false
        }
    }
}
