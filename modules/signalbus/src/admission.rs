//! Per-event admission control.
//!
//! Bounds how many messages for one event may run their pipeline at once on
//! this node. Messages over the limit wait for a permit; nothing is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::BusError;
use crate::registry::Registry;

#[derive(Debug, Default)]
pub struct Admission {
    limits: HashMap<String, Arc<Semaphore>>,
}

impl Admission {
    /// One semaphore per event that has a limit, from the event itself or
    /// from `default_limit`. Zero counts as one; a limit beyond what a
    /// semaphore can hold is refused.
    pub fn new(registry: &Registry, default_limit: Option<usize>) -> Result<Self, BusError> {
        let mut limits = HashMap::new();
        for (name, def) in registry.events() {
            let Some(limit) = def.concurrency.or(default_limit) else {
                continue;
            };
            if limit > Semaphore::MAX_PERMITS {
                return Err(BusError::InvalidConfig {
                    subject: name.to_string(),
                    message: format!(
                        "concurrency {limit} exceeds {}",
                        Semaphore::MAX_PERMITS
                    ),
                });
            }
            limits.insert(name.to_string(), Arc::new(Semaphore::new(limit.max(1))));
        }
        Ok(Self { limits })
    }

    /// Wait for a slot for `event`. `None` when the event is unbounded.
    pub async fn admit(&self, event: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.limits.get(event)?;
        Arc::clone(semaphore).acquire_owned().await.ok()
    }

    /// Free slots for `event`, `None` when unbounded.
    pub fn available(&self, event: &str) -> Option<usize> {
        self.limits.get(event).map(|s| s.available_permits())
    }
}
