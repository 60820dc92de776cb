//! kubesnap core types: resource taxonomy, instance records and snapshots.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod config;
mod error;

pub use config::{CollectConfig, KeyPolicy};
pub use error::{BoxError, DiscoveryError, DiscoveryStage, FetchError, PartialDiscoveryError, PersistError};

pub mod prelude {
    pub use super::{
        ClusterSnapshot, CollectConfig, Diagnostic, DiscoveryError, FetchError, InstanceRecord, KeyPolicy,
        PersistError, ResourceCapability, ResourceIdentity, Stage, TaxonomyEntry, TypeSnapshot,
    };
}

/// Verb a resource must advertise to be collected.
pub const LIST_VERB: &str = "list";

/// Group/Version/Resource triple addressing one resource type on the API server.
///
/// The core (legacy) group is the empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdentity {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceIdentity {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

/// Rendered kubectl style: `deployments.v1.apps`, `pods.v1` for the core group.
impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

/// What the server says a discovered type supports at a given group/version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceCapability {
    pub kind: String,
    pub namespaced: bool,
    pub verbs: SmallVec<[String; 8]>,
}

impl ResourceCapability {
    pub fn supports(&self, verb: &str) -> bool { self.verbs.iter().any(|v| v == verb) }

    pub fn is_listable(&self) -> bool { self.supports(LIST_VERB) }
}

/// One retrievable type, as produced by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub identity: ResourceIdentity,
    pub capability: ResourceCapability,
}

/// A single live object, kept exactly as the server returned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct InstanceRecord(serde_json::Value);

impl InstanceRecord {
    pub fn new(raw: serde_json::Value) -> Self { Self(raw) }

    pub fn raw(&self) -> &serde_json::Value { &self.0 }

    pub fn into_raw(self) -> serde_json::Value { self.0 }

    pub fn kind(&self) -> &str { self.0.get("kind").and_then(|v| v.as_str()).unwrap_or("") }

    pub fn name(&self) -> &str { self.meta_str("name") }

    /// Namespace of the object; empty for cluster-scoped objects.
    pub fn namespace(&self) -> &str { self.meta_str("namespace") }

    fn meta_str(&self, field: &str) -> &str {
        self.0
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }
}

impl From<serde_json::Value> for InstanceRecord {
    fn from(v: serde_json::Value) -> Self { Self(v) }
}

/// All instances of one type at the moment it was listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct TypeSnapshot {
    pub items: Vec<InstanceRecord>,
}

impl TypeSnapshot {
    pub fn new(items: Vec<InstanceRecord>) -> Self { Self { items } }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, InstanceRecord> { self.items.iter() }
}

/// Terminal artifact of a run: persistence key -> non-empty [`TypeSnapshot`].
///
/// Only the assembler builds one; afterwards it is read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct ClusterSnapshot {
    types: BTreeMap<String, TypeSnapshot>,
}

impl ClusterSnapshot {
    /// Build from already-keyed entries. Empty type snapshots are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, TypeSnapshot)>) -> Self {
        let types = entries.into_iter().filter(|(_, s)| !s.is_empty()).collect();
        Self { types }
    }

    pub fn get(&self, key: &str) -> Option<&TypeSnapshot> { self.types.get(key) }
    pub fn contains(&self, key: &str) -> bool { self.types.contains_key(key) }
    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.types.keys().map(String::as_str) }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeSnapshot)> { self.types.iter().map(|(k, v)| (k.as_str(), v)) }

    /// Total number of instance records across all types.
    pub fn record_count(&self) -> usize { self.types.values().map(TypeSnapshot::len).sum() }
}

/// Pipeline stage a [`Diagnostic`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resources,
    Fetch,
    Collision,
    Persist,
    Cancelled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resources => "resources",
            Stage::Fetch => "fetch",
            Stage::Collision => "collision",
            Stage::Persist => "persist",
            Stage::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// A recovered failure: something is missing from the result and this says why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: Stage,
    /// What was affected: a group/version, a GVR, or a persistence key.
    pub target: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self { stage, target: target.into(), message: message.into() }
    }
}

impl From<&PartialDiscoveryError> for Diagnostic {
    fn from(e: &PartialDiscoveryError) -> Self {
        Diagnostic::new(Stage::Resources, e.group_version.clone(), error::render_chain(e))
    }
}

impl From<&FetchError> for Diagnostic {
    fn from(e: &FetchError) -> Self {
        Diagnostic::new(Stage::Fetch, e.identity().to_string(), error::render_chain(e))
    }
}

impl From<&PersistError> for Diagnostic {
    fn from(e: &PersistError) -> Self {
        Diagnostic::new(Stage::Persist, e.target(), error::render_chain(e))
    }
}
