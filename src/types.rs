// Provider data types
//
// Requests coming in from the framework, grains coming back from agents,
// and the provider-agnostic node view built from them.

use crate::addresses::classify_lossy;
use crate::profiles::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Grain holding the cloud metadata of a node
pub const CLOUD_GRAIN: &str = "salt-cloud";

/// Every listed node is assumed live
pub const RUNNING_STATE: &str = "running";

fn default_true() -> bool {
    true
}

/// How the framework invoked an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Against named nodes (`-a`, `-d`)
    Action,
    /// Provider-wide (`-f`)
    Function,
}

/// Request to create a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmRequest {
    /// Node identifier, unique in the fleet
    pub name: String,

    /// Run the bootstrap service after creation
    #[serde(default = "default_true")]
    pub deploy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,

    /// Remaining request fields, handed to bootstrap untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VmRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deploy: true,
            profile: None,
            driver: None,
            ssh_host: None,
            ssh_port: None,
            extra: Map::new(),
        }
    }
}

/// Context handed to the bootstrap service next to the request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BootstrapContext {
    pub driver: String,
    pub provider: String,
    pub profile: Option<Profile>,
}

/// Cloud metadata reported under the `salt-cloud` grain
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudMetadata {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

/// Grains of one node, reduced to the fields the provider reads
///
/// Unknown grains are ignored during deserialization. Only `id` is required:
/// address grains that are not lists and a `salt-cloud` grain that is not a
/// table read as empty, so one odd grain never hides the node.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawNodeFacts {
    pub id: String,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub ipv4: Vec<Value>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub ipv6: Vec<Value>,
    #[serde(rename = "salt-cloud", default, deserialize_with = "table_or_default")]
    pub cloud: CloudMetadata,
}

fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

fn table_or_default<'de, D>(deserializer: D) -> Result<CloudMetadata, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl RawNodeFacts {
    /// String entries of an address grain; anything else is logged and dropped
    fn literals<'a>(&'a self, grain: &str, values: &'a [Value]) -> Vec<&'a str> {
        values
            .iter()
            .filter_map(|value| match value.as_str() {
                Some(literal) => Some(literal),
                None => {
                    tracing::warn!(
                        "Omitting non-string {} entry reported by {}: {}",
                        grain,
                        self.id,
                        value
                    );
                    None
                }
            })
            .collect()
    }
}

/// Provider-agnostic node view returned by `list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedNode {
    pub id: String,
    pub image: String,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
    pub size: String,
    pub state: String,
}

impl NormalizedNode {
    /// Build the node view from grains; malformed addresses are omitted
    pub fn from_facts(facts: &RawNodeFacts) -> Self {
        let ipv4 = facts.literals("ipv4", &facts.ipv4);
        let ipv6 = facts.literals("ipv6", &facts.ipv6);
        let addresses = classify_lossy(&facts.id, ipv4.as_slice(), ipv6.as_slice());
        Self {
            id: facts.id.clone(),
            image: facts.cloud.profile.clone().unwrap_or_default(),
            private_ips: addresses.private,
            public_ips: addresses.public,
            size: String::new(),
            state: RUNNING_STATE.to_string(),
        }
    }

    /// Project the node onto the requested field names
    pub fn select(&self, fields: &[String]) -> Map<String, Value> {
        let mut selected = Map::new();
        if let Ok(Value::Object(all)) = serde_json::to_value(self) {
            for field in fields {
                if let Some(value) = all.get(field) {
                    selected.insert(field.clone(), value.clone());
                }
            }
        }
        selected
    }
}

/// Event published to the event sink
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LifecycleEvent {
    pub id: Uuid,
    /// Human readable name, e.g. `destroying instance`
    pub name: String,
    /// Routing tag, e.g. `salt/cloud/node1/destroying`
    pub tag: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(name: &str, node: &str, stage: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tag: format!("salt/cloud/{}/{}", node, stage),
            payload,
            timestamp: Utc::now(),
        }
    }
}
