//! Transport boundary.
//!
//! A [`Driver`] opens [`Connection`]s; the bus never looks past these traits.
//! Inbound bytes come back through the [`Delegate`] handed to `accept`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Health {
    pub workload: i64,
}

/// Receiver of inbound messages.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn serve(&self, name: &str, data: &[u8]);
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn open(&self) -> Result<()>;
    async fn health(&self) -> Result<Health>;
    async fn close(&self) -> Result<()>;

    /// Install the receiver for inbound messages.
    async fn accept(&self, delegate: Arc<dyn Delegate>) -> Result<()>;
    /// Declare interest in `name`. Members of one non-empty `group` share a
    /// single copy of each message.
    async fn register(&self, group: &str, name: &str) -> Result<()>;
    /// Begin delivering to the accepted delegate.
    async fn start(&self) -> Result<()>;

    async fn publish(&self, name: &str, data: &[u8]) -> Result<()>;
}

pub trait Driver: Send + Sync {
    fn connect(&self, name: &str, config: &Config) -> Result<Box<dyn Connection>>;
}
