//! Built-in drivers.

pub mod memory;

pub use memory::{MemoryDriver, Published};

/// Name the in-process driver is registered under.
pub const MEMORY: &str = "memory";
