use std::path::Path;

use anyhow::Context;
use envconfig::Envconfig;
use ha_message_bus::{JsonConfigStore, MessageBus};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use health_event_publisher::config::Config;
use health_event_publisher::event::EventsFile;
use health_event_publisher::publisher::{publish_events, ClusterContext, HA_INDEX};

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Interrupted, finishing the current event..."),
        Err(err) => {
            error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    let events = EventsFile::load(Path::new(&config.events_file))?;

    let mut store = JsonConfigStore::new();
    store.load_file(HA_INDEX, Path::new(&config.ha_config_file))?;

    let bus = MessageBus::global();
    bus.init(&store)?;

    let context = ClusterContext::load(&store)?;
    let producer = bus.get_producer(
        &config.producer_id,
        &context.message_type,
        config.message_type_partitions,
    )?;

    let published = publish_events(&producer, &context, &events, shutdown())
        .await
        .context("Health event generator failed")?;
    info!(
        "published {} health event(s) to {}",
        published, context.message_type
    );

    Ok(())
}
