//! In-process transport.
//!
//! Connections created from one [`MemoryDriver`] (or its clones) share a
//! broker, and connections with the same name share a channel on it: a
//! publish through `primary` reaches the subscribers of every `primary`
//! connection and nothing else. Deliveries are awaited inline, which keeps
//! tests deterministic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::Config;
use crate::driver::{Connection, Delegate, Driver, Health};

/// A message as it crossed the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub connection: String,
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    broker: Arc<Broker>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that keeps a copy of every published message for
    /// [`Self::published`]. The log is never trimmed.
    pub fn recording() -> Self {
        Self {
            broker: Arc::new(Broker {
                record: true,
                ..Default::default()
            }),
        }
    }

    /// Every message published through this driver's connections, in order.
    /// Always empty unless the driver was built with [`Self::recording`].
    pub fn published(&self) -> Vec<Published> {
        self.broker
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, name: &str, _config: &Config) -> Result<Box<dyn Connection>> {
        let endpoint = Endpoint {
            id: self.broker.next_id.fetch_add(1, Ordering::Relaxed),
            connection: name.to_string(),
            delegate: RwLock::new(None),
            open: AtomicBool::new(false),
            started: AtomicBool::new(false),
            inflight: AtomicI64::new(0),
        };
        Ok(Box::new(MemoryConnection {
            broker: Arc::clone(&self.broker),
            endpoint: Arc::new(endpoint),
        }))
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Broker {
    subscribers: RwLock<Vec<Subscriber>>,
    record: bool,
    published: Mutex<Vec<Published>>,
    next_id: AtomicU64,
    turn: AtomicUsize,
}

struct Subscriber {
    group: String,
    name: String,
    endpoint: Arc<Endpoint>,
}

impl Broker {
    /// Subscribers to `name` on `connection`: every ungrouped one, plus one
    /// member of each group chosen round-robin. Only started endpoints are
    /// eligible.
    fn targets(&self, connection: &str, name: &str) -> Vec<Arc<Endpoint>> {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut targets = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&Arc<Endpoint>>> = BTreeMap::new();
        for sub in subscribers.iter().filter(|s| {
            s.name == name
                && s.endpoint.connection == connection
                && s.endpoint.started.load(Ordering::Acquire)
        }) {
            if sub.group.is_empty() {
                targets.push(Arc::clone(&sub.endpoint));
            } else {
                groups.entry(sub.group.as_str()).or_default().push(&sub.endpoint);
            }
        }

        if !groups.is_empty() {
            let turn = self.turn.fetch_add(1, Ordering::Relaxed);
            for members in groups.values() {
                targets.push(Arc::clone(members[turn % members.len()]));
            }
        }
        targets
    }

    fn forget(&self, endpoint: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.endpoint.id != endpoint);
    }
}

struct Endpoint {
    id: u64,
    connection: String,
    delegate: RwLock<Option<Arc<dyn Delegate>>>,
    open: AtomicBool,
    started: AtomicBool,
    inflight: AtomicI64,
}

impl Endpoint {
    async fn deliver(&self, name: &str, data: &[u8]) {
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            self.inflight.fetch_add(1, Ordering::AcqRel);
            delegate.serve(name, data).await;
            self.inflight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            bail!("memory connection {} is not open", self.connection);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct MemoryConnection {
    broker: Arc<Broker>,
    endpoint: Arc<Endpoint>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open(&self) -> Result<()> {
        self.endpoint.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn health(&self) -> Result<Health> {
        Ok(Health {
            workload: self.endpoint.inflight.load(Ordering::Acquire),
        })
    }

    async fn close(&self) -> Result<()> {
        self.endpoint.started.store(false, Ordering::Release);
        self.endpoint.open.store(false, Ordering::Release);
        self.broker.forget(self.endpoint.id);
        // Drops the delegate, which may hold a path back to this connection.
        self.endpoint
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    async fn accept(&self, delegate: Arc<dyn Delegate>) -> Result<()> {
        *self
            .endpoint
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(delegate);
        Ok(())
    }

    async fn register(&self, group: &str, name: &str) -> Result<()> {
        self.endpoint.ensure_open()?;
        self.broker
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                group: group.to_string(),
                name: name.to_string(),
                endpoint: Arc::clone(&self.endpoint),
            });
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.endpoint.ensure_open()?;
        let accepted = self
            .endpoint
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if !accepted {
            bail!(
                "memory connection {} started without a delegate",
                self.endpoint.connection
            );
        }
        self.endpoint.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn publish(&self, name: &str, data: &[u8]) -> Result<()> {
        self.endpoint.ensure_open()?;
        if self.broker.record {
            self.broker
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Published {
                    connection: self.endpoint.connection.clone(),
                    name: name.to_string(),
                    data: data.to_vec(),
                });
        }

        for endpoint in self.broker.targets(&self.endpoint.connection, name) {
            endpoint.deliver(name, data).await;
        }
        Ok(())
    }
}
