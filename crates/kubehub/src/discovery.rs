use kubesnap_core::{DiscoveryError, PartialDiscoveryError, ResourceCapability, ResourceIdentity, TaxonomyEntry};
use tracing::{debug, info, warn};

use crate::ControlPlane;

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Listable types, in server order: groups, then versions, then resources.
    pub entries: Vec<TaxonomyEntry>,
    /// Group/versions whose resource list could not be retrieved.
    pub failures: Vec<PartialDiscoveryError>,
}

/// Enumerate every served group/version/resource and keep the listable ones.
///
/// All versions of a group are visited, not only the preferred one, so the same
/// resource can appear once per version. A failing group/version is recorded
/// and skipped; only a failing group catalog aborts.
pub async fn discover(plane: &dyn ControlPlane) -> Result<Discovery, DiscoveryError> {
    let groups = plane.server_groups().await.map_err(DiscoveryError::groups)?;
    let mut out = Discovery::default();
    let mut pruned = 0usize;

    for group in &groups {
        for version in &group.versions {
            let resources = match plane.server_resources(&group.name, version).await {
                Ok(r) => r,
                Err(cause) => {
                    let group_version = if group.name.is_empty() { version.clone() } else { format!("{}/{}", group.name, version) };
                    warn!(gv = %group_version, error = %cause, "resource discovery failed; skipping group/version");
                    metrics::counter!("kubesnap_discovery_errors_total", 1u64);
                    out.failures.push(PartialDiscoveryError { group_version, cause });
                    continue;
                }
            };
            for res in resources {
                let identity = ResourceIdentity::new(group.name.clone(), version.clone(), res.name.clone());
                let capability = ResourceCapability { kind: res.kind.clone(), namespaced: res.namespaced, verbs: res.verbs.iter().cloned().collect() };
                if res.is_subresource() || !capability.is_listable() {
                    debug!(gvr = %identity, "not listable; pruned");
                    pruned += 1;
                    continue;
                }
                out.entries.push(TaxonomyEntry { identity, capability });
            }
        }
    }

    info!(groups = groups.len(), listable = out.entries.len(), pruned, failed = out.failures.len(), "discovery complete");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockControlPlane;

    #[tokio::test]
    async fn prunes_types_without_list() {
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["get", "list", "watch"])
            .with_resource("", "v1", "bindings", "Binding", true, &["create"])
            .with_resource("", "v1", "pods/log", "Pod", true, &["get", "list"]);
        let d = discover(&plane).await.unwrap();
        let names: Vec<_> = d.entries.iter().map(|e| e.identity.resource.as_str()).collect();
        assert_eq!(names, vec!["pods"]);
        assert!(d.failures.is_empty());
    }

    #[tokio::test]
    async fn visits_every_version_of_a_group() {
        let plane = MockControlPlane::new()
            .with_resource("autoscaling", "v1", "horizontalpodautoscalers", "HorizontalPodAutoscaler", true, &["list"])
            .with_resource("autoscaling", "v2", "horizontalpodautoscalers", "HorizontalPodAutoscaler", true, &["list"]);
        let d = discover(&plane).await.unwrap();
        let versions: Vec<_> = d.entries.iter().map(|e| e.identity.version.as_str()).collect();
        assert_eq!(versions, vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn group_catalog_failure_is_fatal() {
        let plane = MockControlPlane::new().with_resource("", "v1", "pods", "Pod", true, &["list"]).failing_groups();
        let err = discover(&plane).await.unwrap_err();
        assert_eq!(err.stage, kubesnap_core::DiscoveryStage::Groups);
    }

    #[tokio::test]
    async fn one_failing_group_version_is_skipped() {
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "pods", "Pod", true, &["list"])
            .with_resource("apps", "v1", "deployments", "Deployment", true, &["list"])
            .with_resource("batch", "v1", "jobs", "Job", true, &["list"])
            .failing_resources("apps", "v1");
        let d = discover(&plane).await.unwrap();
        let names: Vec<_> = d.entries.iter().map(|e| e.identity.to_string()).collect();
        assert_eq!(names, vec!["pods.v1", "jobs.v1.batch"]);
        assert_eq!(d.failures.len(), 1);
        assert_eq!(d.failures[0].group_version, "apps/v1");
    }

    #[tokio::test]
    async fn preserves_server_order() {
        let plane = MockControlPlane::new()
            .with_resource("", "v1", "services", "Service", true, &["list"])
            .with_resource("", "v1", "configmaps", "ConfigMap", true, &["list"])
            .with_resource("apps", "v1", "statefulsets", "StatefulSet", true, &["list"]);
        let d = discover(&plane).await.unwrap();
        let names: Vec<_> = d.entries.iter().map(|e| e.identity.resource.as_str()).collect();
        assert_eq!(names, vec!["services", "configmaps", "statefulsets"]);
    }
}
