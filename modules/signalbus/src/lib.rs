//! In-process event bus.
//!
//! Named events arrive over pluggable transports, are decoded, matched to a
//! registered [`EventDefinition`], validated against its argument schema and
//! handed to its action through a pipeline of filters and terminal handlers.
//! Outbound notices are reshaped against their schema and routed to a
//! connection by weighted consistent hashing.
//!
//! ```no_run
//! use signalbus::{EventBus, EventDefinition, Metadata, Var, Vars};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut bus = EventBus::new();
//! bus.register_event(
//!     "pay.finish",
//!     EventDefinition::new()
//!         .with_args(Vars::new().with("order", Var::string().required()))
//!         .with_action(|ctx| tracing::info!(args = ?ctx.args, "paid")),
//!     false,
//! )?;
//!
//! let bus = bus.start().await?;
//! bus.publish("pay.finish", Metadata::default()).await?;
//! bus.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
pub mod definition;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod hashring;
pub mod instance;
pub mod metadata;
mod pipeline;
pub mod registry;

pub use admission::Admission;
pub use bus::{EventBus, RunningBus};
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{load_config, parse_config, BusConfig, BusSettings, Config, EventEntry, DEFAULT};
pub use context::{Branch, Context};
pub use definition::{
    hook, CtxFn, EventDefinition, FilterDefinition, HandlerDefinition, NoticeDefinition,
};
pub use driver::{Connection, Delegate, Driver, Health};
pub use drivers::{MemoryDriver, Published};
pub use error::BusError;
pub use hashring::HashRing;
pub use instance::Instance;
pub use metadata::Metadata;
pub use registry::{relate, Catalog, Registry, Subscription};

pub use signalbus_mapping::{FieldError, Kind, Map, Mapping, Var, Vars};
