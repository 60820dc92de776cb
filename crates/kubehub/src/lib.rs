//! kubesnap kubehub: the API-server boundary, taxonomy discovery and per-type listing.

#![forbid(unsafe_code)]

mod discovery;
mod fetch;
mod kube_plane;
mod mock;

use async_trait::async_trait;
use kubesnap_core::{BoxError, TaxonomyEntry};

pub use discovery::{discover, Discovery};
pub use fetch::{fetch, FetchOptions};
pub use kube_plane::{connect, ConnectError, KubeControlPlane};
pub use mock::MockControlPlane;

/// An API group and every version it serves. The core group has an empty name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiGroup {
    pub name: String,
    pub versions: Vec<String>,
}

/// One row of a group/version resource list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResourceEntry {
    /// Plural resource name, or `resource/subresource`.
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl ApiResourceEntry {
    pub fn is_subresource(&self) -> bool { self.name.contains('/') }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<serde_json::Value>,
    /// Set when the server has more items; pass back in the next [`PageRequest`].
    pub continue_token: Option<String>,
}

/// Everything the pipeline needs from a control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// All API groups, core group included.
    async fn server_groups(&self) -> Result<Vec<ApiGroup>, BoxError>;

    /// Resources served at one group/version.
    async fn server_resources(&self, group: &str, version: &str) -> Result<Vec<ApiResourceEntry>, BoxError>;

    /// One page of live instances for a type, optionally restricted to a namespace.
    async fn list_page(&self, entry: &TaxonomyEntry, namespace: Option<&str>, page: &PageRequest) -> Result<ListPage, BoxError>;
}
