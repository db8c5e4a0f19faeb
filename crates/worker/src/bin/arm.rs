//! Arm a single notification.
//!
//! Usage: `redelay-arm <key> <value>`
//!
//! Uses the same environment as the worker, so the first delivery fires after
//! the first step of `NOTIFY_RETRY_POLICIES`. A value of `ok` is acknowledged
//! by the worker on first delivery.

use redelay_common::config::AppConfig;
use redelay_common::types::Entity;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    redelay_worker::init_tracing("redelay_worker=info,redelay_engine=debug");

    let mut args = std::env::args().skip(1);
    let (Some(key), Some(value)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: redelay-arm <key> <value>");
    };

    let config = AppConfig::from_env()?;
    let engine = redelay_worker::connect_engine(&config).await?;

    let entity = Entity::new(key, value);
    engine.put_notification(&entity).await?;

    tracing::info!(
        key = %entity.key_lossy(),
        delay_secs = engine.policy().at(entity.attempt())?.as_secs(),
        "Notification armed"
    );
    Ok(())
}
