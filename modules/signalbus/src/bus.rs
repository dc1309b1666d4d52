//! Bus lifecycle: register, start, publish, stop.
//!
//! [`EventBus`] is the registering phase and is the only place definitions
//! can be added. [`EventBus::start`] consumes it and returns a [`RunningBus`]
//! whose registry sits behind an `Arc` and can no longer change, so serving
//! never races registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::admission::Admission;
use crate::codec::{Codec, Codecs};
use crate::config::{BusSettings, Config, DEFAULT};
use crate::context::Context;
use crate::definition::{EventDefinition, FilterDefinition, HandlerDefinition, NoticeDefinition};
use crate::driver::{Driver, Health};
use crate::drivers::{MemoryDriver, MEMORY};
use crate::error::BusError;
use crate::hashring::{HashRing, MAX_WEIGHT};
use crate::instance::Instance;
use crate::metadata::Metadata;
use crate::registry::Registry;
use crate::Map;

pub struct EventBus {
    registry: Registry,
    drivers: HashMap<String, Arc<dyn Driver>>,
    codecs: Codecs,
    settings: BusSettings,
}

impl EventBus {
    /// An empty bus with the in-process driver and the json codec available.
    pub fn new() -> Self {
        let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(MEMORY.to_string(), Arc::new(MemoryDriver::new()));
        Self {
            registry: Registry::new(),
            drivers,
            codecs: Codecs::new(),
            settings: BusSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: BusSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    pub fn register_event(
        &mut self,
        name: impl Into<String>,
        def: EventDefinition,
        override_existing: bool,
    ) -> Result<(), BusError> {
        self.registry.register_event(name, def, override_existing)
    }

    pub fn register_notice(
        &mut self,
        name: impl Into<String>,
        def: NoticeDefinition,
        override_existing: bool,
    ) -> Result<(), BusError> {
        self.registry.register_notice(name, def, override_existing)
    }

    pub fn register_filter(
        &mut self,
        name: impl Into<String>,
        def: FilterDefinition,
        override_existing: bool,
    ) -> bool {
        self.registry.register_filter(name, def, override_existing)
    }

    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        def: HandlerDefinition,
        override_existing: bool,
    ) -> bool {
        self.registry.register_handler(name, def, override_existing)
    }

    pub fn register_config(
        &mut self,
        name: impl Into<String>,
        config: Config,
        override_existing: bool,
    ) -> bool {
        self.registry.register_config(name, config, override_existing)
    }

    pub fn register_configs<I, S>(&mut self, configs: I, override_existing: bool)
    where
        I: IntoIterator<Item = (S, Config)>,
        S: Into<String>,
    {
        self.registry.register_configs(configs, override_existing)
    }

    pub fn register_authorizer<F>(&mut self, f: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.registry.register_authorizer(f)
    }

    /// A taken name is kept unless `override_existing`.
    pub fn register_driver(
        &mut self,
        name: impl Into<String>,
        driver: impl Driver + 'static,
        override_existing: bool,
    ) -> bool {
        let name = name.into();
        if !override_existing && self.drivers.contains_key(&name) {
            return false;
        }
        self.drivers.insert(name, Arc::new(driver));
        true
    }

    pub fn register_codec(
        &mut self,
        name: impl Into<String>,
        codec: impl Codec + 'static,
        override_existing: bool,
    ) -> bool {
        self.codecs.register(name, Arc::new(codec), override_existing)
    }

    // ---------------------------------------------------------------------
    // Start
    // ---------------------------------------------------------------------

    /// Seal the registry, open a connection per config, subscribe and start
    /// them. With no configs, a single [`DEFAULT`] connection is created.
    ///
    /// If any connection fails, those already opened are closed again.
    pub async fn start(self) -> Result<RunningBus, BusError> {
        let EventBus {
            mut registry,
            drivers,
            codecs,
            settings,
        } = self;

        if registry.configs().is_empty() {
            registry.register_config(DEFAULT, Config::default(), false);
        }
        let mut names: Vec<String> = registry.configs().keys().cloned().collect();
        names.sort();
        registry.bind(&names, &settings.role);

        let registry = Arc::new(registry);
        let admission = Arc::new(Admission::new(&registry, settings.concurrency)?);

        let mut ring = HashRing::new();
        let mut instances: HashMap<String, Instance> = HashMap::new();
        let mut result = Ok(());
        for name in &names {
            match connect(name, &registry, &drivers, &codecs, &admission).await {
                Ok(instance) => {
                    ring.add(name, instance.config().weight);
                    instances.insert(name.clone(), instance);
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if result.is_ok() {
            for name in &names {
                if let Some(instance) = instances.get(name) {
                    if let Err(err) = instance.launch(&registry).await {
                        result = Err(err);
                        break;
                    }
                }
            }
        }

        let running = RunningBus {
            registry,
            instances,
            ring,
        };
        if let Err(err) = result {
            warn!(error = %err, "Bus failed to start, closing opened connections");
            running.close_all().await;
            return Err(err);
        }

        info!(
            connections = names.len(),
            role = settings.role.as_str(),
            "Event bus started"
        );
        Ok(running)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect(
    name: &str,
    registry: &Arc<Registry>,
    drivers: &HashMap<String, Arc<dyn Driver>>,
    codecs: &Codecs,
    admission: &Arc<Admission>,
) -> Result<Instance, BusError> {
    let config = registry.config(name).cloned().unwrap_or_default();
    if config.weight > MAX_WEIGHT {
        return Err(BusError::InvalidConfig {
            subject: name.to_string(),
            message: format!("weight {} exceeds {MAX_WEIGHT}", config.weight),
        });
    }
    let driver = drivers
        .get(&config.driver)
        .ok_or_else(|| BusError::UnknownDriver {
            connection: name.to_string(),
            driver: config.driver.clone(),
        })?;
    let codec = codecs
        .get(&config.codec)
        .ok_or_else(|| BusError::UnknownCodec {
            connection: name.to_string(),
            codec: config.codec.clone(),
        })?;

    let connection = driver
        .connect(name, &config)
        .map_err(BusError::Transport)?;
    let instance = Instance::new(
        name.to_string(),
        config,
        codec,
        connection,
        Arc::clone(registry),
        Arc::clone(admission),
    );
    instance.open().await?;
    Ok(instance)
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

pub struct RunningBus {
    registry: Arc<Registry>,
    instances: HashMap<String, Instance>,
    ring: HashRing,
}

impl RunningBus {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// The connection that owns `name` on the ring.
    pub fn locate(&self, name: &str) -> Option<&str> {
        self.ring.locate(name)
    }

    /// Publish through whichever connection owns `name`.
    pub async fn publish(&self, name: &str, metadata: Metadata) -> Result<(), BusError> {
        let target = self
            .ring
            .locate(name)
            .ok_or_else(|| BusError::NoRoute(name.to_string()))?;
        self.publish_to(target, name, metadata).await
    }

    /// Publish through a named connection, bypassing the ring.
    pub async fn publish_to(
        &self,
        connection: &str,
        name: &str,
        mut metadata: Metadata,
    ) -> Result<(), BusError> {
        let instance = self
            .instances
            .get(connection)
            .ok_or_else(|| BusError::UnknownConnection(connection.to_string()))?;
        self.reshape(name, &mut metadata);
        instance.publish(name, &metadata).await
    }

    /// Best effort: a payload that does not fit the notice schema is sent as-is.
    fn reshape(&self, name: &str, metadata: &mut Metadata) {
        let Some(notice) = self.registry.notice(name) else {
            return;
        };
        let Some(args) = notice.args.as_ref() else {
            return;
        };
        let Some(payload) = metadata.payload.as_ref().filter(|p| !p.is_empty()) else {
            return;
        };

        let mut shaped = Map::new();
        let mapping = signalbus_mapping::map(
            args,
            payload,
            &mut shaped,
            notice.nullable,
            false,
            metadata.offset(),
        );
        if mapping.ok() {
            metadata.payload = Some(shaped);
        } else {
            debug!(
                notice = name,
                reason = %mapping,
                "Payload does not fit notice, publishing unchanged"
            );
        }
    }

    pub async fn health(&self) -> HashMap<String, Result<Health, BusError>> {
        let mut report = HashMap::new();
        for (name, instance) in &self.instances {
            report.insert(name.clone(), instance.health().await);
        }
        report
    }

    /// Close every connection. Errors are logged, not returned, so one bad
    /// connection does not keep the others open.
    pub async fn stop(self) {
        self.close_all().await;
        info!("Event bus stopped");
    }

    async fn close_all(&self) {
        for (name, instance) in &self.instances {
            if let Err(err) = instance.close().await {
                warn!(connection = name.as_str(), error = %err, "Failed to close connection");
            }
        }
    }
}
