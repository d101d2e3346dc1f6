// ============================================================================
// storecheck: conformance harness for remote entity stores
// ============================================================================

// Lets `#[derive(Entity)]` output refer to `::storecheck` from inside this crate.
extern crate self as storecheck;

pub mod actor;
pub mod connection;
pub mod core;
pub mod marshal;
pub mod requirements;
pub mod runner;
pub mod schema;
pub mod transport;
pub mod values;

// Re-export main types for convenience
pub use core::{EntityId, EntityState, ErrorKind, PropertySet, Result, StoreError, Value};
pub use marshal::{BaseEntity, Entity, EntityRecord, Properties, Property};
pub use storecheck_derive::{Entity, Properties};

// Re-export the connection and runner API
pub use actor::{Actor, FindQuery, ListQuery, MutateOptions, RetrieveOptions};
pub use connection::{CallerContext, Connection, ConnectionConfig, Tenant};
pub use runner::{Report, Requirement, Runner, TestResult};
