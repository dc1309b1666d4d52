//! A configured connection: one transport connection plus the codec, prefix
//! and weight it was configured with.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::admission::Admission;
use crate::codec::{self, Codec};
use crate::config::Config;
use crate::context::Context;
use crate::driver::{Connection, Delegate, Health};
use crate::error::BusError;
use crate::metadata::Metadata;
use crate::pipeline;
use crate::registry::Registry;

pub struct Instance {
    name: String,
    config: Config,
    codec: Arc<dyn Codec>,
    connection: Box<dyn Connection>,
    dispatcher: Arc<Dispatcher>,
}

impl Instance {
    pub(crate) fn new(
        name: String,
        config: Config,
        codec: Arc<dyn Codec>,
        connection: Box<dyn Connection>,
        registry: Arc<Registry>,
        admission: Arc<Admission>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher {
            connection: name.clone(),
            prefix: config.prefix.clone(),
            codec: Arc::clone(&codec),
            registry,
            admission,
        });
        Self {
            name,
            config,
            codec,
            connection,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one inbound message through the pipeline. Returns the spent
    /// context; the bus itself never replies to the sender.
    pub async fn serve(&self, alias: &str, data: &[u8]) -> Context {
        self.dispatcher.dispatch(alias, data).await
    }

    /// Encode `metadata` with this instance's codec and publish it under the
    /// prefixed name.
    pub async fn publish(&self, name: &str, metadata: &Metadata) -> Result<(), BusError> {
        let bytes = codec::marshal(self.codec.as_ref(), metadata)?;
        let wire = format!("{}{}", self.config.prefix, name);
        debug!(connection = self.name.as_str(), name = wire.as_str(), bytes = bytes.len(), "Publishing");
        self.connection
            .publish(&wire, &bytes)
            .await
            .map_err(BusError::Transport)
    }

    pub async fn health(&self) -> Result<Health, BusError> {
        self.connection.health().await.map_err(BusError::Transport)
    }

    pub(crate) async fn open(&self) -> Result<(), BusError> {
        self.connection.open().await.map_err(BusError::Transport)
    }

    /// Subscribe every bound alias, install the dispatcher, start delivery.
    pub(crate) async fn launch(&self, registry: &Registry) -> Result<(), BusError> {
        let subscriptions = registry.subscriptions(&self.name);
        for sub in subscriptions {
            let wire = format!("{}{}", self.config.prefix, sub.alias);
            self.connection
                .register(&sub.group, &wire)
                .await
                .map_err(BusError::Transport)?;
        }
        let delegate: Arc<dyn Delegate> = self.dispatcher.clone();
        self.connection
            .accept(delegate)
            .await
            .map_err(BusError::Transport)?;
        self.connection.start().await.map_err(BusError::Transport)?;

        info!(
            connection = self.name.as_str(),
            driver = self.config.driver.as_str(),
            subscriptions = subscriptions.len(),
            "Connection launched"
        );
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<(), BusError> {
        self.connection.close().await.map_err(BusError::Transport)
    }
}

/// Inbound half of an instance, handed to the connection as its delegate.
pub(crate) struct Dispatcher {
    connection: String,
    prefix: String,
    codec: Arc<dyn Codec>,
    registry: Arc<Registry>,
    admission: Arc<Admission>,
}

impl Dispatcher {
    async fn dispatch(&self, alias: &str, data: &[u8]) -> Context {
        let alias = alias.strip_prefix(self.prefix.as_str()).unwrap_or(alias);
        let mut ctx = Context::new(Arc::clone(&self.registry), &self.connection, alias);

        let mut undecodable = None;
        if let Some(name) = self.registry.resolve(&self.connection, alias) {
            ctx.name = name.to_string();
            ctx.event = self.registry.event(name);
            match codec::unmarshal(self.codec.as_ref(), data) {
                Ok(metadata) => ctx.set_metadata(metadata),
                Err(err) => {
                    warn!(
                        event = name,
                        connection = self.connection.as_str(),
                        error = %err,
                        "Failed to decode inbound metadata"
                    );
                    undecodable = Some(err);
                }
            }
        }

        let _permit = self.admission.admit(&ctx.name).await;
        match undecodable {
            Some(err) => pipeline::reject(&mut ctx, err),
            None => pipeline::serve(&mut ctx),
        }
        pipeline::respond(&mut ctx);
        ctx
    }
}

#[async_trait]
impl Delegate for Dispatcher {
    async fn serve(&self, name: &str, data: &[u8]) {
        self.dispatch(name, data).await;
    }
}
