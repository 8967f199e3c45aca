//! Vagrant Provider Library
//!
//! Node-lifecycle driver for a Vagrant-backed cloud provider: creates,
//! destroys, reboots and lists nodes, and normalizes the grains agents report
//! into a provider-agnostic node view.

pub mod addresses;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod metrics;
pub mod profiles;
pub mod provider;
pub mod rpc;
pub mod types;

pub use error::{ProviderError, ProviderResult};
pub use provider::{Collaborators, VagrantProvider};
pub use types::{CallKind, NormalizedNode, VmRequest};
