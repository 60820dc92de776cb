use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ResourceIdentity;

/// How a [`ResourceIdentity`] maps to its persistence key (and file name).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    /// Bare resource name (`pods`). Types sharing a name across groups or
    /// versions collide; the later one in discovery order wins.
    #[default]
    ResourceName,
    /// Full identity (`deployments.v1.apps`); never collides.
    Qualified,
}

impl KeyPolicy {
    pub fn key_for(&self, id: &ResourceIdentity) -> String {
        match self {
            KeyPolicy::ResourceName => id.resource.clone(),
            KeyPolicy::Qualified => id.to_string(),
        }
    }
}

/// Per-run collection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectConfig {
    /// Restrict namespaced types to one namespace. Cluster-scoped types are
    /// still listed cluster-wide.
    pub namespace: Option<String>,
    /// Maximum fetches in flight.
    pub concurrency: usize,
    /// Overall deadline for the run, discovery included.
    pub timeout: Option<Duration>,
    pub key_policy: KeyPolicy,
    /// Drop `metadata.managedFields` from every record.
    pub strip_managed_fields: bool,
    /// Page size requested from the server; `None` asks for everything at once.
    pub page_size: Option<u32>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 8,
            timeout: None,
            key_policy: KeyPolicy::default(),
            strip_managed_fields: false,
            page_size: Some(500),
        }
    }
}

impl CollectConfig {
    /// Concurrency clamped to at least one worker.
    pub fn workers(&self) -> usize { self.concurrency.max(1) }
}
