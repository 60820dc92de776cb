use std::path::Path;

use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{DynamicObject, TypeMeta},
    Client, Config,
};
use kubesnap_core::{BoxError, TaxonomyEntry};
use tracing::{debug, info};

use crate::{ApiGroup, ApiResourceEntry, ControlPlane, ListPage, PageRequest};

/// Possible errors while turning a kubeconfig into a client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to process kube configuration")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to build kubernetes client")]
    Client(#[from] kube::Error),
}

/// Build a client from the kubeconfig at `path`, using `context` or the file's current context.
pub async fn connect(path: &Path, context: Option<&str>) -> Result<Client, ConnectError> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let options = KubeConfigOptions { context: context.map(str::to_owned), cluster: None, user: None };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    info!(cluster = %config.cluster_url, "kubeconfig loaded");
    Ok(Client::try_from(config)?)
}

/// [`ControlPlane`] backed by a live API server.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self { Self { client } }
}

fn api_resource(entry: &TaxonomyEntry) -> ApiResource {
    let id = &entry.identity;
    ApiResource {
        group: id.group.clone(),
        version: id.version.clone(),
        api_version: id.api_version(),
        kind: entry.capability.kind.clone(),
        plural: id.resource.clone(),
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn server_groups(&self) -> Result<Vec<ApiGroup>, BoxError> {
        let core = self.client.list_core_api_versions().await?;
        let named = self.client.list_api_groups().await?;
        let mut out = Vec::with_capacity(named.groups.len() + 1);
        out.push(ApiGroup { name: String::new(), versions: core.versions });
        for g in named.groups {
            out.push(ApiGroup { name: g.name, versions: g.versions.into_iter().map(|v| v.version).collect() });
        }
        debug!(groups = out.len(), "server groups listed");
        Ok(out)
    }

    async fn server_resources(&self, group: &str, version: &str) -> Result<Vec<ApiResourceEntry>, BoxError> {
        let list = if group.is_empty() {
            self.client.list_core_api_resources(version).await?
        } else {
            self.client.list_api_group_resources(&format!("{}/{}", group, version)).await?
        };
        Ok(list
            .resources
            .into_iter()
            .map(|r| ApiResourceEntry { name: r.name, kind: r.kind, namespaced: r.namespaced, verbs: r.verbs })
            .collect())
    }

    async fn list_page(&self, entry: &TaxonomyEntry, namespace: Option<&str>, page: &PageRequest) -> Result<ListPage, BoxError> {
        let ar = api_resource(entry);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let mut lp = ListParams::default();
        if let Some(limit) = page.limit { lp = lp.limit(limit); }
        if let Some(token) = page.continue_token.as_deref() { lp = lp.continue_token(token); }

        let list = api.list(&lp).await?;
        let continue_token = list.metadata.continue_.filter(|t| !t.is_empty());
        let mut items = Vec::with_capacity(list.items.len());
        for mut obj in list.items {
            // List responses omit apiVersion/kind on items.
            if obj.types.is_none() {
                obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
            }
            items.push(serde_json::to_value(&obj)?);
        }
        Ok(ListPage { items, continue_token })
    }
}
