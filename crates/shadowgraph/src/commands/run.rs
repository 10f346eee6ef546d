use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use shadowgraph_api::{ConfigClient, FeedHandle};
use shadowgraph_config::Config;
use shadowgraph_core::StoreGateway;

use super::build_engine;
use crate::cli::RunArgs;
use crate::error::CliError;

/// Follow the live store until interrupted or the coordinator fails.
pub async fn handle(mut config: Config, args: RunArgs) -> Result<(), CliError> {
    if let Some(url) = args.store_url {
        config.store.url = url;
    }
    if let Some(url) = args.feed_url {
        config.feed.url = url;
    }
    config.validate()?;

    let client = ConfigClient::new(config.store_url()?, &config.transport_config())?;
    let store: Arc<dyn StoreGateway> = Arc::new(client);
    let engine = build_engine(&config, &store)?;

    let cancel = CancellationToken::new();
    let mut feed = FeedHandle::connect(
        config.feed_url()?,
        config.reconnect_config(),
        cancel.child_token(),
        config.auth_token(),
    )?;
    let events = feed.take_events().ok_or_else(|| CliError::Engine {
        message: "change feed receiver already taken".into(),
    })?;

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    info!(store = %config.store.url, feed = %config.feed.url, "starting");
    let result = engine.coordinator.run_feed(events, feed.status(), cancel).await;
    feed.shutdown();
    result?;

    info!(traced = engine.traces.len(), "stopped");
    Ok(())
}
