//! Profile Registry
//!
//! A profile is this provider's unit of machine template. Profiles are
//! loaded once from configuration and are read-only afterwards.

use crate::error::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// VM profile as configured under `[profiles.<name>]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Driver this profile belongs to (filled from the provider when unset)
    #[serde(default)]
    pub driver: String,

    /// Login user for bootstrap
    #[serde(default)]
    pub ssh_username: Option<String>,

    /// Remove the node's box and Vagrant config on destroy
    #[serde(default = "default_true")]
    pub remove_config_on_destroy: bool,

    /// Shut the node down on destroy
    #[serde(default = "default_true")]
    pub shutdown_on_destroy: bool,

    /// Agent that runs `vagrant` for this profile
    #[serde(default)]
    pub host: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            driver: String::new(),
            ssh_username: None,
            remove_config_on_destroy: true,
            shutdown_on_destroy: true,
            host: None,
        }
    }
}

/// Read-only lookup of configured profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    /// Build the registry for `driver`, validating every profile
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if a profile names a different
    /// driver.
    pub fn new(driver: &str, profiles: BTreeMap<String, Profile>) -> ProviderResult<Self> {
        let mut resolved = BTreeMap::new();
        for (name, mut profile) in profiles {
            if profile.driver.is_empty() {
                profile.driver = driver.to_string();
            } else if profile.driver != driver {
                return Err(ProviderError::Config(format!(
                    "profile '{}' uses driver '{}', expected '{}'",
                    name, profile.driver, driver
                )));
            }
            resolved.insert(name, profile);
        }

        tracing::debug!("Loaded {} profile(s) for driver {}", resolved.len(), driver);
        Ok(Self { profiles: resolved })
    }

    /// Resolve a profile by name
    pub fn resolve(&self, name: &str) -> ProviderResult<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProviderError::ProfileNotFound(name.to_string()))
    }

    /// Configured profile names, sorted
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
