//! hyperdrive-common
//!
//! Pieces shared by the HyperDrive holon replication engine and the
//! cross-chain bridge orchestrator:
//!
//! - [`error`]: the uniform result contract (`HdResult`, `HyperDriveError`, `ErrorKind`)
//! - [`types`]: provider ids, capabilities, health and amounts
//! - [`config`]: replication, retry, health and bridge policies
//! - [`registry`]: the provider registry and router
//! - [`retry`]: backoff schedule and bounded waits

pub mod config;
pub mod error;
pub mod registry;
pub mod retry;
pub mod types;

pub use config::{
    BridgeConfig, HealthPolicy, HyperDriveConfig, ReadConsistency, ReplicationPolicy, RetryPolicy,
};
pub use error::{fail, ok, ErrorKind, HdResult, HyperDriveError, ProviderFailure, ResultExt};
pub use registry::{
    parse_provider_list, select_candidates, Provider, ProviderRegistration, ProviderRegistry,
    RegistrationInfo,
};
pub use retry::with_timeout;
pub use types::{Amount, Capability, ProviderCategory, ProviderHealth, ProviderId, ProviderKey};
