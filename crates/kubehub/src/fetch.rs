use std::collections::HashSet;
use std::time::Instant;

use kubesnap_core::{FetchError, InstanceRecord, TaxonomyEntry, TypeSnapshot};
use tracing::{debug, trace};

use crate::{ControlPlane, PageRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Page size to request; the server may ignore it.
    pub page_size: Option<u32>,
    pub strip_managed_fields: bool,
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// List every live instance of one type.
///
/// `namespace` restricts a namespaced type to one namespace; passing it for a
/// cluster-scoped type is rejected. Continue tokens are followed until the
/// server stops returning one. Any page failure fails the whole fetch, and so
/// does a continue token the server already handed out.
pub async fn fetch(
    plane: &dyn ControlPlane,
    entry: &TaxonomyEntry,
    namespace: Option<&str>,
    opts: &FetchOptions,
) -> Result<TypeSnapshot, FetchError> {
    if let Some(ns) = namespace {
        if !entry.capability.namespaced {
            return Err(FetchError::NamespaceOnClusterScoped { identity: entry.identity.clone(), namespace: ns.to_string() });
        }
    }

    let started = Instant::now();
    // limit=0 means "no limit" to the API server.
    let limit = opts.page_size.filter(|n| *n > 0);
    let mut page = PageRequest { limit, continue_token: None };
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut items = Vec::new();
    let mut pages = 0usize;
    loop {
        let res = plane
            .list_page(entry, namespace, &page)
            .await
            .map_err(|cause| FetchError::transport(entry.identity.clone(), cause))?;
        pages += 1;
        trace!(gvr = %entry.identity, page = pages, count = res.items.len(), "page received");
        items.extend(res.items.into_iter().map(|mut raw| {
            if opts.strip_managed_fields {
                strip_managed_fields(&mut raw);
            }
            InstanceRecord::new(raw)
        }));
        let Some(token) = res.continue_token else { break };
        if !seen_tokens.insert(token.clone()) {
            return Err(FetchError::transport(
                entry.identity.clone(),
                format!("server repeated continue token {:?} after {} pages", token, pages),
            ));
        }
        page.continue_token = Some(token);
    }

    metrics::histogram!("kubesnap_fetch_ms", started.elapsed().as_secs_f64() * 1000.0);
    metrics::counter!("kubesnap_fetch_total", 1u64);
    debug!(gvr = %entry.identity, ns = ?namespace, count = items.len(), pages, "fetched");
    Ok(TypeSnapshot::new(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{ApiGroup, ApiResourceEntry, ListPage, MockControlPlane};
    use async_trait::async_trait;
    use kubesnap_core::{BoxError, ResourceIdentity};
    use serde_json::json;

    /// Hands out `a`, `b`, `a`, ... as continue tokens and never finishes.
    #[derive(Default)]
    struct CyclingPlane {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ControlPlane for CyclingPlane {
        async fn server_groups(&self) -> Result<Vec<ApiGroup>, BoxError> { Ok(Vec::new()) }

        async fn server_resources(&self, _: &str, _: &str) -> Result<Vec<ApiResourceEntry>, BoxError> { Ok(Vec::new()) }

        async fn list_page(&self, _: &TaxonomyEntry, _: Option<&str>, _: &PageRequest) -> Result<ListPage, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n > 10 {
                return Err("paging never terminated".into());
            }
            let token = if n % 2 == 0 { "a" } else { "b" };
            Ok(ListPage { items: vec![pod(&format!("p{}", n), "default")], continue_token: Some(token.to_string()) })
        }
    }

    fn entry(plane: &MockControlPlane, id: &ResourceIdentity) -> TaxonomyEntry {
        plane.entry(id).expect("entry registered")
    }

    fn pod(name: &str, ns: &str) -> serde_json::Value {
        json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": name, "namespace": ns, "managedFields": [{"manager": "kubectl"}]}})
    }

    #[tokio::test]
    async fn fetches_all_instances_across_namespaces() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, vec![pod("a", "default"), pod("b", "kube-system")]);
        let snap = fetch(&plane, &entry(&plane, &pods), None, &FetchOptions::default()).await.unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.items[1].namespace(), "kube-system");
        assert_eq!(plane.list_calls(), 1);
    }

    #[tokio::test]
    async fn namespace_restricts_namespaced_types() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, vec![pod("a", "default"), pod("b", "kube-system")]);
        let snap = fetch(&plane, &entry(&plane, &pods), Some("default"), &FetchOptions::default()).await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.items[0].name(), "a");
    }

    #[tokio::test]
    async fn namespace_on_cluster_scoped_type_is_rejected() {
        let nodes = ResourceIdentity::new("", "v1", "nodes");
        let plane = MockControlPlane::new().with_resource("", "v1", "nodes", "Node", false, &["list"]);
        let err = fetch(&plane, &entry(&plane, &nodes), Some("default"), &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::NamespaceOnClusterScoped { .. }));
        assert_eq!(plane.list_calls(), 0);
    }

    #[tokio::test]
    async fn follows_continue_tokens() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let items: Vec<_> = (0..5).map(|i| pod(&format!("p{}", i), "default")).collect();
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, items);
        let opts = FetchOptions { page_size: Some(2), ..Default::default() };
        let snap = fetch(&plane, &entry(&plane, &pods), None, &opts).await.unwrap();
        let names: Vec<_> = snap.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(plane.list_calls(), 3);
    }

    #[tokio::test]
    async fn repeated_continue_token_fails_the_fetch() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let plane = CyclingPlane::default();
        let entry = MockControlPlane::new().with_resource("", "v1", "pods", "Pod", true, &["list"]).entry(&pods).unwrap();
        let opts = FetchOptions { page_size: Some(1), ..Default::default() };
        let err = fetch(&plane, &entry, None, &opts).await.unwrap_err();
        assert!(matches!(&err, FetchError::Transport { identity, .. } if identity == &pods));
        let cause = std::error::Error::source(&err).map(|c| c.to_string()).unwrap_or_default();
        assert!(cause.contains("repeated continue token \"a\""), "{}", cause);
        // a, b, then a again.
        assert_eq!(plane.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_page_size_lists_everything_in_one_call() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let items: Vec<_> = (0..5).map(|i| pod(&format!("p{}", i), "default")).collect();
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, items);
        let opts = FetchOptions { page_size: Some(0), ..Default::default() };
        let snap = fetch(&plane, &entry(&plane, &pods), None, &opts).await.unwrap();
        assert_eq!(snap.len(), 5);
        assert_eq!(plane.list_calls(), 1);
    }

    #[tokio::test]
    async fn failure_on_a_later_page_discards_earlier_pages() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let items: Vec<_> = (0..5).map(|i| pod(&format!("p{}", i), "default")).collect();
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, items)
            .failing_page(&pods, 1);
        let opts = FetchOptions { page_size: Some(2), ..Default::default() };
        let err = fetch(&plane, &entry(&plane, &pods), None, &opts).await.unwrap_err();
        assert!(matches!(&err, FetchError::Transport { identity, .. } if identity == &pods));
        assert_eq!(plane.list_calls(), 2);
    }

    #[tokio::test]
    async fn transport_failure_yields_no_partial_snapshot() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, vec![pod("a", "default")])
            .failing_list(&pods);
        let err = fetch(&plane, &entry(&plane, &pods), None, &FetchOptions::default()).await.unwrap_err();
        assert_eq!(err.identity(), &pods);
    }

    #[tokio::test]
    async fn strips_managed_fields_on_request() {
        let pods = ResourceIdentity::new("", "v1", "pods");
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_instances(&pods, vec![pod("a", "default")]);
        let kept = fetch(&plane, &entry(&plane, &pods), None, &FetchOptions::default()).await.unwrap();
        assert!(kept.items[0].raw()["metadata"].get("managedFields").is_some());
        let opts = FetchOptions { strip_managed_fields: true, ..Default::default() };
        let stripped = fetch(&plane, &entry(&plane, &pods), None, &opts).await.unwrap();
        assert!(stripped.items[0].raw()["metadata"].get("managedFields").is_none());
        assert_eq!(stripped.items[0].name(), "a");
    }
}
