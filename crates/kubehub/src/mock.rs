//! In-memory control plane for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kubesnap_core::{BoxError, ResourceCapability, ResourceIdentity, TaxonomyEntry};

use crate::{ApiGroup, ApiResourceEntry, ControlPlane, ListPage, PageRequest};

/// Builder-style fake API server.
///
/// Groups and versions are registered implicitly, in insertion order, by
/// [`MockControlPlane::with_resource`].
#[derive(Default)]
pub struct MockControlPlane {
    groups: Vec<ApiGroup>,
    resources: HashMap<(String, String), Vec<ApiResourceEntry>>,
    instances: HashMap<ResourceIdentity, Vec<serde_json::Value>>,
    fail_groups: bool,
    fail_resources: HashSet<(String, String)>,
    fail_lists: HashSet<ResourceIdentity>,
    fail_pages: HashMap<ResourceIdentity, usize>,
    delays: HashMap<ResourceIdentity, Duration>,
    groups_delay: Option<Duration>,
    list_delay: Option<Duration>,
    list_calls: AtomicUsize,
    requests: Mutex<Vec<(ResourceIdentity, Option<String>)>>,
}

impl MockControlPlane {
    pub fn new() -> Self { Self::default() }

    /// Register a group/version (if new) with no resources.
    pub fn with_group_version(mut self, group: &str, version: &str) -> Self {
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(g) => {
                if !g.versions.iter().any(|v| v == version) {
                    g.versions.push(version.to_string());
                }
            }
            None => self.groups.push(ApiGroup { name: group.to_string(), versions: vec![version.to_string()] }),
        }
        self.resources.entry((group.to_string(), version.to_string())).or_default();
        self
    }

    pub fn with_resource(mut self, group: &str, version: &str, name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Self {
        self = self.with_group_version(group, version);
        let entry = ApiResourceEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        };
        self.resources.entry((group.to_string(), version.to_string())).or_default().push(entry);
        self
    }

    pub fn with_instances(mut self, id: &ResourceIdentity, items: Vec<serde_json::Value>) -> Self {
        self.instances.insert(id.clone(), items);
        self
    }

    pub fn failing_groups(mut self) -> Self {
        self.fail_groups = true;
        self
    }

    pub fn failing_resources(mut self, group: &str, version: &str) -> Self {
        self.fail_resources.insert((group.to_string(), version.to_string()));
        self
    }

    pub fn failing_list(mut self, id: &ResourceIdentity) -> Self {
        self.fail_lists.insert(id.clone());
        self
    }

    /// Fail the `page`th list call (zero-based) for one type; earlier pages succeed.
    pub fn failing_page(mut self, id: &ResourceIdentity, page: usize) -> Self {
        self.fail_pages.insert(id.clone(), page);
        self
    }

    /// Delay the group catalog response.
    pub fn with_slow_groups(mut self, delay: Duration) -> Self {
        self.groups_delay = Some(delay);
        self
    }

    /// Delay every list call.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Delay list calls for one type; overrides [`Self::with_list_delay`].
    pub fn with_slow_list(mut self, id: &ResourceIdentity, delay: Duration) -> Self {
        self.delays.insert(id.clone(), delay);
        self
    }

    /// Number of `list_page` calls that reached the server.
    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }

    /// `(type, namespace)` of every list call, in arrival order.
    pub fn list_requests(&self) -> Vec<(ResourceIdentity, Option<String>)> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Taxonomy entry for a registered resource, as discovery would build it.
    pub fn entry(&self, id: &ResourceIdentity) -> Option<TaxonomyEntry> {
        let list = self.resources.get(&(id.group.clone(), id.version.clone()))?;
        let res = list.iter().find(|r| r.name == id.resource)?;
        Some(TaxonomyEntry {
            identity: id.clone(),
            capability: ResourceCapability { kind: res.kind.clone(), namespaced: res.namespaced, verbs: res.verbs.iter().cloned().collect() },
        })
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn server_groups(&self) -> Result<Vec<ApiGroup>, BoxError> {
        if let Some(delay) = self.groups_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_groups {
            return Err("the server is currently unable to handle the request".into());
        }
        Ok(self.groups.clone())
    }

    async fn server_resources(&self, group: &str, version: &str) -> Result<Vec<ApiResourceEntry>, BoxError> {
        let key = (group.to_string(), version.to_string());
        if self.fail_resources.contains(&key) {
            return Err(format!("unable to retrieve the complete list of server APIs: {}/{}", group, version).into());
        }
        self.resources.get(&key).cloned().ok_or_else(|| format!("group/version {}/{} not found", group, version).into())
    }

    async fn list_page(&self, entry: &TaxonomyEntry, namespace: Option<&str>, page: &PageRequest) -> Result<ListPage, BoxError> {
        let id = &entry.identity;
        if let Some(delay) = self.delays.get(id).copied().or(self.list_delay) {
            tokio::time::sleep(delay).await;
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push((id.clone(), namespace.map(str::to_owned)));
        if self.fail_lists.contains(id) {
            return Err(format!("{} is forbidden", id.resource).into());
        }

        let all: Vec<&serde_json::Value> = self
            .instances
            .get(id)
            .map(|items| {
                items
                    .iter()
                    .filter(|o| match namespace {
                        Some(ns) => o.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str()) == Some(ns),
                        None => true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let offset = match page.continue_token.as_deref() {
            Some(t) => t.parse::<usize>().map_err(|_| format!("invalid continue token {:?}", t))?,
            None => 0,
        };
        // limit=0 is "no limit", as on a real API server.
        let limit = page.limit.filter(|n| *n > 0).map(|n| n as usize);
        if let Some(&fail_at) = self.fail_pages.get(id) {
            if offset / limit.unwrap_or(usize::MAX) == fail_at {
                return Err(format!("the server has received too many requests listing {}", id.resource).into());
            }
        }
        let end = match limit {
            Some(limit) => (offset + limit).min(all.len()),
            None => all.len(),
        };
        let items = all.get(offset..end).unwrap_or_default().iter().map(|v| (*v).clone()).collect();
        let continue_token = (end < all.len()).then(|| end.to_string());
        Ok(ListPage { items, continue_token })
    }
}
