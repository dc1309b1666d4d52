use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use signalbus::{
    load_config, Branch, BusConfig, EventBus, EventDefinition, EventEntry, HandlerDefinition,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signalbus-node", about = "Run a signalbus node")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, env = "SIGNALBUS_CONFIG", default_value = "signalbus.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("signalbus=info".parse()?)
                .add_directive("signalbus_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        info!(config = %cli.config.display(), "Loading config");
        load_config(&cli.config)?
    } else {
        warn!(config = %cli.config.display(), "Config file not found, using defaults");
        BusConfig::default()
    };
    let BusConfig {
        bus: settings,
        connections,
        events,
    } = config;

    let mut bus = EventBus::new().with_settings(settings);
    bus.register_configs(connections, false);
    bus.register_handler("log", logging_handler(), false);
    for (name, entry) in events {
        bus.register_event(name, declared_event(entry), false)?;
    }

    let bus = bus.start().await?;
    let catalog = bus.registry().catalog();
    info!(
        events = catalog.events.len(),
        notices = catalog.notices.len(),
        catalog = %serde_json::to_string(&catalog)?,
        "Node ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bus.stop().await;
    Ok(())
}

/// An event declared in the config file. Its action only logs what arrived.
fn declared_event(entry: EventEntry) -> EventDefinition {
    let mut def = EventDefinition::new()
        .with_alias(entry.alias)
        .with_connect(entry.connect)
        .with_group(entry.group)
        .with_action(|ctx| {
            info!(
                event = ctx.name.as_str(),
                connection = ctx.connection.as_str(),
                trace = ctx.metadata.trace.as_deref().unwrap_or_default(),
                payload = %serde_json::Value::Object(ctx.value.clone()),
                "Event received"
            );
        });
    if entry.grouping {
        def = def.grouping();
    }
    if let Some(limit) = entry.concurrency {
        def = def.with_concurrency(limit);
    }
    def
}

fn logging_handler() -> HandlerDefinition {
    HandlerDefinition::new()
        .with_text("Logs every message that leaves the happy path")
        .on(Branch::Found, |ctx| {
            warn!(
                alias = ctx.alias.as_str(),
                connection = ctx.connection.as_str(),
                "No event bound to alias"
            );
        })
        .on(Branch::Failed, |ctx| {
            let reason = ctx.mapping().map(ToString::to_string).unwrap_or_default();
            warn!(event = ctx.name.as_str(), reason = reason.as_str(), "Arguments rejected");
        })
        .on(Branch::Error, |ctx| {
            if let Some(err) = ctx.last_error() {
                error!(event = ctx.name.as_str(), error = %err, "Event failed");
            }
        })
        .on(Branch::Denied, |ctx| {
            warn!(
                event = ctx.name.as_str(),
                reason = ctx.denial().unwrap_or_default(),
                "Event denied"
            );
        })
}
