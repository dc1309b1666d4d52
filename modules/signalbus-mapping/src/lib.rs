//! Schema-driven value mapping.
//!
//! Coerces loosely-typed JSON payloads into the shapes declared by an argument
//! schema ([`Vars`]). Used on the inbound side to materialize event arguments
//! and on the outbound side to reshape published payloads.
//!
//! Validation problems are reported as data ([`Mapping`]), never as `Err`:
//! callers decide whether a failed mapping is fatal.

pub mod mapping;
pub mod var;

pub use mapping::{map, FieldError, Mapping};
pub use var::{Kind, Var, Vars};

/// A JSON object, the unit of payload the mapper reads and writes.
pub type Map = serde_json::Map<String, serde_json::Value>;
