//! Lifecycle Collaborators
//!
//! The provider never provisions software, drives `vagrant`, publishes
//! events or checks credentials itself. Each of those lives behind a trait so
//! a host can supply its own implementation (or a test double) when the
//! provider is constructed.
//!
//! | Trait                  | Default adapter         |
//! |------------------------|-------------------------|
//! | [`BootstrapService`]   | [`ScriptBootstrap`]     |
//! | [`VirtualizationTool`] | [`RemoteVagrant`]       |
//! | [`EventSink`]          | [`TracingEventSink`]    |
//! | [`Verifier`]           | [`ReachabilityVerifier`] |

use crate::profiles::Profile;
use crate::rpc::{functions, target_succeeded, RpcClient, Target};
use crate::types::{BootstrapContext, LifecycleEvent, VmRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// Installs and configures software on an already-created node
#[async_trait]
pub trait BootstrapService: Send + Sync {
    async fn run(&self, request: &VmRequest, context: &BootstrapContext) -> Result<bool>;
}

/// Removes a node's box and Vagrant configuration
#[async_trait]
pub trait VirtualizationTool: Send + Sync {
    async fn remove(&self, node_id: &str, profile: &Profile) -> Result<bool>;
}

/// Receives lifecycle events; failures are ignored by the caller
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Checks a create request before anything happens
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, request: &VmRequest) -> bool;
}

/// Runs a bootstrap command for the node
///
/// The request is passed as JSON in `VM_REQUEST`, together with
/// `NODE_NAME`, `NODE_PROFILE`, `SSH_HOST` and `SSH_USERNAME`.
#[derive(Debug, Clone)]
pub struct ScriptBootstrap {
    command: Vec<String>,
}

impl ScriptBootstrap {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BootstrapService for ScriptBootstrap {
    async fn run(&self, request: &VmRequest, context: &BootstrapContext) -> Result<bool> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("No bootstrap command configured"))?;

        let username = context
            .profile
            .as_ref()
            .and_then(|p| p.ssh_username.clone())
            .unwrap_or_default();

        tracing::info!("Bootstrapping {} with {}", request.name, program);

        let status = Command::new(program)
            .args(args)
            .env("NODE_NAME", &request.name)
            .env("NODE_PROFILE", request.profile.as_deref().unwrap_or(""))
            .env("SSH_HOST", request.ssh_host.as_deref().unwrap_or(&request.name))
            .env("SSH_USERNAME", username)
            .env("VM_REQUEST", serde_json::to_string(request)?)
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run bootstrap command {}", program))?;

        if !status.success() {
            tracing::warn!("Bootstrap of {} exited with {:?}", request.name, status.code());
        }
        Ok(status.success())
    }
}

/// Runs `vagrant.destroy` on the profile's host agent
pub struct RemoteVagrant {
    rpc: Arc<dyn RpcClient>,
}

impl RemoteVagrant {
    pub fn new(rpc: Arc<dyn RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl VirtualizationTool for RemoteVagrant {
    async fn remove(&self, node_id: &str, profile: &Profile) -> Result<bool> {
        let host = profile
            .host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Profile has no vagrant host for {}", node_id))?;

        let response = self
            .rpc
            .call(&Target::node(host), functions::VAGRANT_DESTROY, &[json!(node_id)])
            .await?;
        Ok(target_succeeded(&response, host))
    }
}

/// Publishes events as structured log records
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LifecycleEvent) -> Result<()> {
        tracing::info!(
            event_id = %event.id,
            tag = %event.tag,
            payload = %event.payload,
            "{}",
            event.name
        );
        Ok(())
    }
}

/// Accepts a request when its SSH endpoint answers
///
/// Requests without `ssh_host` only need a non-empty name.
#[derive(Debug, Clone)]
pub struct ReachabilityVerifier {
    timeout: Duration,
}

impl ReachabilityVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Verifier for ReachabilityVerifier {
    async fn verify(&self, request: &VmRequest) -> bool {
        if request.name.trim().is_empty() {
            tracing::warn!("Rejecting create request without a name");
            return false;
        }

        let Some(host) = request.ssh_host.as_deref() else {
            return true;
        };
        let port = request.ssh_port.unwrap_or(22);

        tracing::debug!("Testing SSH reachability for {} at {}:{}", request.name, host, port);
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!("Cannot reach {}:{} for {}: {}", host, port, request.name, e);
                false
            }
            Err(_) => {
                tracing::warn!("Timed out reaching {}:{} for {}", host, port, request.name);
                false
            }
        }
    }
}
