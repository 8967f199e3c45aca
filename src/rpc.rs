//! RPC Dispatch Client
//!
//! The transport that runs a named function on one or more agents and
//! returns a mapping from agent id to raw result. Every call is a single
//! round trip, even for a single target.
//!
//! [`SaltCommandClient`] is the default implementation and shells out to the
//! `salt` CLI:
//!
//! ```text
//! salt --static --out=json [-G] <target> <function> [args...]
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;

/// Agent responses keyed by agent id
pub type RpcResponse = HashMap<String, Value>;

/// Remote function names used by the provider
pub mod functions {
    pub const GRAINS_GET: &str = "grains.get";
    pub const GRAINS_ITEMS: &str = "grains.items";
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
    pub const SYSTEM_REBOOT: &str = "system.reboot";
    pub const VAGRANT_DESTROY: &str = "vagrant.destroy";
}

/// Which agents a call is dispatched to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single agent by id
    Node(String),
    /// Every agent whose grains match `key:value`
    Grain { expr: String },
}

impl Target {
    pub fn node(id: impl Into<String>) -> Self {
        Target::Node(id.into())
    }

    /// Agents tagged with the given cloud driver
    pub fn driver(driver: &str) -> Self {
        Target::Grain {
            expr: format!("salt-cloud:driver:{}", driver),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(id) => write!(f, "{}", id),
            Target::Grain { expr } => write!(f, "G@{}", expr),
        }
    }
}

/// Remote-execution transport
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Run `function` with `args` on the agents selected by `target`
    async fn call(&self, target: &Target, function: &str, args: &[Value]) -> Result<RpcResponse>;
}

/// Whether an agent's result counts as success
///
/// Agents that did not answer are reported as `null` or `false`; empty
/// strings and collections carry no result either.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Success flag of a single-target call
pub fn target_succeeded(response: &RpcResponse, node_id: &str) -> bool {
    response.get(node_id).map(is_truthy).unwrap_or(false)
}

/// [`RpcClient`] backed by the `salt` command line
#[derive(Debug, Clone)]
pub struct SaltCommandClient {
    command: String,
}

impl SaltCommandClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_args(target: &Target, function: &str, args: &[Value]) -> Vec<String> {
        let mut argv = vec!["--static".to_string(), "--out=json".to_string()];
        match target {
            Target::Node(id) => argv.push(id.clone()),
            Target::Grain { expr } => {
                argv.push("-G".to_string());
                argv.push(expr.clone());
            }
        }
        argv.push(function.to_string());
        for arg in args {
            match arg {
                Value::String(s) => argv.push(s.clone()),
                other => argv.push(other.to_string()),
            }
        }
        argv
    }
}

#[async_trait]
impl RpcClient for SaltCommandClient {
    async fn call(&self, target: &Target, function: &str, args: &[Value]) -> Result<RpcResponse> {
        let argv = Self::build_args(target, function, args);
        tracing::debug!("Dispatching {} to {}: {} {:?}", function, target, self.command, argv);

        let output = Command::new(&self.command)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.command))?;

        // salt exits non-zero when some targets did not answer but still
        // prints the answers it got.
        if !output.status.success() {
            tracing::debug!(
                "{} exited with {:?}: {}",
                self.command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            if output.status.success() {
                return Ok(RpcResponse::new());
            }
            anyhow::bail!(
                "{} {} failed: {}",
                function,
                target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let response: RpcResponse = serde_json::from_str(stdout.trim())
            .with_context(|| format!("Failed to parse {} output for {}", function, target))?;

        tracing::debug!("{} answered by {} agent(s)", function, response.len());
        Ok(response)
    }
}
