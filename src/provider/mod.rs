//! Vagrant Lifecycle Orchestrator
//!
//! Implements the provider operations the orchestration framework calls:
//! create, destroy, reboot, node listing and capability enumeration.
//!
//! # Destroy Policy
//!
//! `destroy` runs in a fixed order. Steps 2 and 3 are each gated by their own
//! profile flag, and nothing runs if step 1 fails:
//!
//! 1. fetch the node's `salt-cloud` grain and resolve its profile
//! 2. `shutdown_on_destroy`: run `system.shutdown` on the node
//! 3. `remove_config_on_destroy`: remove the box through the virtualization tool
//!
//! The returned flag is the outcome of step 2 only. A failed config removal
//! is logged but does not change it, and a profile that opts out of both
//! steps makes destroy a no-op that still reports success.
//!
//! # Error Reporting
//!
//! `create`, `destroy` and `reboot` report RPC failures as `false`. Profile
//! problems and call-kind mismatches are raised as [`ProviderError`].

use crate::collaborators::{
    BootstrapService, EventSink, ReachabilityVerifier, RemoteVagrant, ScriptBootstrap,
    TracingEventSink, Verifier, VirtualizationTool,
};
use crate::config::Config;
use crate::error::{ProviderError, ProviderResult};
use crate::metrics;
use crate::profiles::ProfileRegistry;
use crate::rpc::{
    functions, is_truthy, target_succeeded, RpcClient, RpcResponse, SaltCommandClient, Target,
};
use crate::types::{
    BootstrapContext, CallKind, CloudMetadata, LifecycleEvent, NormalizedNode, RawNodeFacts,
    VmRequest, CLOUD_GRAIN,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Key of the `avail_images` result
pub const PROFILES_KEY: &str = "Profiles";

/// Injected collaborators of the provider
#[derive(Clone)]
pub struct Collaborators {
    pub rpc: Arc<dyn RpcClient>,
    pub bootstrap: Arc<dyn BootstrapService>,
    pub virtualization: Arc<dyn VirtualizationTool>,
    pub events: Arc<dyn EventSink>,
    pub verifier: Arc<dyn Verifier>,
}

impl Collaborators {
    /// Default adapters built from configuration
    pub fn from_config(config: &Config) -> Self {
        let rpc: Arc<dyn RpcClient> =
            Arc::new(SaltCommandClient::new(config.provider.salt_command.clone()));
        Self {
            bootstrap: Arc::new(ScriptBootstrap::new(config.provider.bootstrap_command.clone())),
            virtualization: Arc::new(RemoteVagrant::new(rpc.clone())),
            events: Arc::new(TracingEventSink),
            verifier: Arc::new(ReachabilityVerifier::new(Duration::from_secs(
                config.provider.verify_timeout_secs,
            ))),
            rpc,
        }
    }
}

/// The Vagrant cloud provider
pub struct VagrantProvider {
    name: String,
    driver: String,
    profiles: ProfileRegistry,
    rpc: Arc<dyn RpcClient>,
    bootstrap: Arc<dyn BootstrapService>,
    virtualization: Arc<dyn VirtualizationTool>,
    events: Arc<dyn EventSink>,
    verifier: Arc<dyn Verifier>,
}

impl VagrantProvider {
    /// Create a provider from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if a profile does not belong to the
    /// configured driver.
    pub fn new(config: &Config, collaborators: Collaborators) -> ProviderResult<Self> {
        let driver = config.provider.driver.clone();
        let profiles = ProfileRegistry::new(&driver, config.profiles.clone())?;

        Ok(Self {
            name: config.provider.name.clone(),
            driver,
            profiles,
            rpc: collaborators.rpc,
            bootstrap: collaborators.bootstrap,
            virtualization: collaborators.virtualization,
            events: collaborators.events,
            verifier: collaborators.verifier,
        })
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Create a node
    ///
    /// With `deploy` unset this only verifies the request. With `deploy` set
    /// the bootstrap service runs exactly once and its flag is returned.
    pub async fn create(&self, request: &VmRequest) -> ProviderResult<bool> {
        let profile = match request.profile.as_deref() {
            Some(name) => Some(self.profiles.resolve(name)?.clone()),
            None => None,
        };

        if !self.verifier.verify(request).await {
            metrics::record_operation("create", false);
            return Err(ProviderError::VerificationFailed(request.name.clone()));
        }

        if !request.deploy {
            info!("Deploy disabled for {}, nothing to bootstrap", request.name);
            metrics::record_operation("create", true);
            return Ok(true);
        }

        let context = BootstrapContext {
            driver: self.driver.clone(),
            provider: self.name.clone(),
            profile,
        };

        info!("Bootstrapping node {}", request.name);
        let deployed = match self.bootstrap.run(request, &context).await {
            Ok(deployed) => deployed,
            Err(e) => {
                warn!("Bootstrap of {} failed: {:#}", request.name, e);
                false
            }
        };

        if deployed {
            self.fire(LifecycleEvent::new(
                "created instance",
                &request.name,
                "created",
                self.event_payload(&request.name, request.profile.as_deref()),
            ));
        }
        metrics::record_operation("create", deployed);
        Ok(deployed)
    }

    /// Destroy a node following its profile's destroy policy
    pub async fn destroy(&self, node_id: &str, call: CallKind) -> ProviderResult<bool> {
        if call == CallKind::Function {
            return Err(ProviderError::InvalidCall {
                operation: "destroy",
                expected: "action",
                hint: "-d, --destroy, -a or --action",
            });
        }

        self.fire(LifecycleEvent::new(
            "destroying instance",
            node_id,
            "destroying",
            json!({ "name": node_id }),
        ));

        let Some(metadata) = self.fetch_cloud_metadata(node_id).await else {
            metrics::record_operation("destroy", false);
            return Ok(false);
        };
        let profile_name = metadata
            .profile
            .ok_or_else(|| ProviderError::MissingProfile(node_id.to_string()))?;
        let profile = self.profiles.resolve(&profile_name)?;

        let mut destroyed = true;

        if profile.shutdown_on_destroy {
            info!("Shutting down {}", node_id);
            destroyed = match self.call_node(node_id, functions::SYSTEM_SHUTDOWN).await {
                Some(response) => target_succeeded(&response, node_id),
                None => false,
            };
            if destroyed {
                info!("system.shutdown for {} successful", node_id);
            }
        }

        if profile.remove_config_on_destroy {
            // Outcome is logged only; the return value stays the shutdown result.
            match self.virtualization.remove(node_id, profile).await {
                Ok(true) => info!("Removed box and configuration of {}", node_id),
                Ok(false) => warn!("Virtualization tool did not remove {}", node_id),
                Err(e) => warn!("Failed to remove configuration of {}: {:#}", node_id, e),
            }
        }

        if !profile.shutdown_on_destroy && !profile.remove_config_on_destroy {
            debug!(
                "Profile {} opts out of shutdown and removal, {} stays up",
                profile_name, node_id
            );
        }

        self.fire(LifecycleEvent::new(
            "destroyed instance",
            node_id,
            "destroyed",
            self.event_payload(node_id, Some(profile_name.as_str())),
        ));
        metrics::record_operation("destroy", destroyed);
        Ok(destroyed)
    }

    /// Reboot a node
    pub async fn reboot(&self, node_id: &str, call: CallKind) -> ProviderResult<bool> {
        if call == CallKind::Function {
            return Err(ProviderError::InvalidCall {
                operation: "reboot",
                expected: "action",
                hint: "-a or --action",
            });
        }

        info!("Rebooting {}", node_id);
        let rebooted = match self.call_node(node_id, functions::SYSTEM_REBOOT).await {
            Some(response) => target_succeeded(&response, node_id),
            None => false,
        };
        metrics::record_operation("reboot", rebooted);
        Ok(rebooted)
    }

    /// Normalized view of every node tagged with this driver
    pub async fn list(&self, call: CallKind) -> ProviderResult<BTreeMap<String, NormalizedNode>> {
        Self::require_function(call, "list_nodes")?;

        let mut nodes = BTreeMap::new();
        for (node_id, grains) in self.fetch_all_grains().await? {
            match serde_json::from_value::<RawNodeFacts>(grains) {
                Ok(facts) => {
                    nodes.insert(node_id, NormalizedNode::from_facts(&facts));
                }
                Err(e) => {
                    warn!("Skipping {}: malformed grains: {}", node_id, e);
                    metrics::NODES_SKIPPED_TOTAL.inc();
                }
            }
        }

        metrics::NODES_LISTED.set(nodes.len() as i64);
        Ok(nodes)
    }

    /// Unmodified grains of every node tagged with this driver
    pub async fn list_full(&self, call: CallKind) -> ProviderResult<BTreeMap<String, Value>> {
        Self::require_function(call, "list_nodes_full")?;
        Ok(self.fetch_all_grains().await?.into_iter().collect())
    }

    /// Selected fields of every normalized node
    pub async fn list_select(
        &self,
        fields: &[String],
        call: CallKind,
    ) -> ProviderResult<BTreeMap<String, Map<String, Value>>> {
        Self::require_function(call, "list_nodes_select")?;
        Ok(self
            .list(call)
            .await?
            .into_iter()
            .map(|(id, node)| (id, node.select(fields)))
            .collect())
    }

    /// Grains of a single node
    pub async fn show_instance(&self, node_id: &str, call: CallKind) -> ProviderResult<Value> {
        if call != CallKind::Action {
            return Err(ProviderError::InvalidCall {
                operation: "show_instance",
                expected: "action",
                hint: "-a or --action",
            });
        }

        let response = self
            .rpc
            .call(&Target::node(node_id), functions::GRAINS_ITEMS, &[])
            .await
            .map_err(|e| ProviderError::Rpc(format!("{:#}", e)))?;

        response
            .get(node_id)
            .filter(|grains| is_truthy(grains))
            .cloned()
            .ok_or_else(|| ProviderError::NodeNotFound(node_id.to_string()))
    }

    /// The provider has no location dimension
    pub fn avail_locations(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// The provider has no sizing dimension
    pub fn avail_sizes(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// Profiles stand in for the image catalog
    pub fn avail_images(&self) -> BTreeMap<String, Vec<String>> {
        let mut images = BTreeMap::new();
        images.insert(PROFILES_KEY.to_string(), self.profiles.names());
        images
    }

    fn require_function(call: CallKind, operation: &'static str) -> ProviderResult<()> {
        if call == CallKind::Action {
            return Err(ProviderError::InvalidCall {
                operation,
                expected: "function",
                hint: "-f or --function",
            });
        }
        Ok(())
    }

    /// Single-target call without arguments; RPC errors become `None`
    async fn call_node(&self, node_id: &str, function: &str) -> Option<RpcResponse> {
        match self.rpc.call(&Target::node(node_id), function, &[]).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("{} on {} failed: {:#}", function, node_id, e);
                None
            }
        }
    }

    async fn fetch_cloud_metadata(&self, node_id: &str) -> Option<CloudMetadata> {
        let response = match self
            .rpc
            .call(&Target::node(node_id), functions::GRAINS_GET, &[json!(CLOUD_GRAIN)])
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetching grains of {} failed: {:#}", node_id, e);
                return None;
            }
        };

        let Some(grains) = response.get(node_id).filter(|g| is_truthy(g)) else {
            warn!("No response from {}. Cannot destroy.", node_id);
            return None;
        };

        match serde_json::from_value::<CloudMetadata>(grains.clone()) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Malformed {} grain on {}: {}", CLOUD_GRAIN, node_id, e);
                None
            }
        }
    }

    /// One aggregated query; agents that did not answer are dropped
    async fn fetch_all_grains(&self) -> ProviderResult<Vec<(String, Value)>> {
        let response = self
            .rpc
            .call(&Target::driver(&self.driver), functions::GRAINS_ITEMS, &[])
            .await
            .map_err(|e| ProviderError::Rpc(format!("{:#}", e)))?;

        debug!("{} agent(s) answered for driver {}", response.len(), self.driver);
        Ok(response
            .into_iter()
            .filter(|(node_id, grains)| {
                let answered = is_truthy(grains);
                if !answered {
                    debug!("{} did not answer", node_id);
                    metrics::NODES_SKIPPED_TOTAL.inc();
                }
                answered
            })
            .collect())
    }

    fn event_payload(&self, node_id: &str, profile: Option<&str>) -> Value {
        json!({
            "name": node_id,
            "profile": profile,
            "provider": self.name,
            "driver": self.driver,
        })
    }

    fn fire(&self, event: LifecycleEvent) {
        if let Err(e) = self.events.emit(&event) {
            debug!("Dropping event {}: {:#}", event.tag, e);
        }
    }
}
