//! hyperdrive-replication
//!
//! HyperDrive: durable replication of holons across heterogeneous storage
//! providers, with automatic failover when a provider is unreachable or
//! does not support an operation.
//!
//! Architecture:
//! 1. Providers implement [`HolonProvider`] and register their capabilities
//! 2. [`HolonManager::save`] fans a write out until the replication floor is met
//! 3. [`HolonManager::load`] serves reads from providers known to hold the holon
//! 4. Deletes write a tombstone; `purge` removes data physically

pub mod directory;
pub mod holon;
pub mod manager;
pub mod memory;
pub mod provider;

pub use directory::DirectoryEntry;
pub use holon::{Holon, HolonType};
pub use manager::{HolonManager, HolonRegistry, LoadOutcome, PurgeOutcome, SaveOutcome, VersionSkew};
pub use memory::InMemoryHolonProvider;
pub use provider::HolonProvider;
