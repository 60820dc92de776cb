#![forbid(unsafe_code)]

use std::sync::Arc;

use kubesnap_collect::{CancellationToken, Collector};
use kubesnap_core::{CollectConfig, ResourceIdentity};
use kubesnap_kubehub::MockControlPlane;
use serde_json::json;

fn cluster() -> MockControlPlane {
    let pods = ResourceIdentity::new("", "v1", "pods");
    let nodes = ResourceIdentity::new("", "v1", "nodes");
    MockControlPlane::new()
        .with_resource("", "v1", "pods", "Pod", true, &["get", "list", "watch"])
        .with_resource("", "v1", "nodes", "Node", false, &["get", "list"])
        .with_resource("apps", "v1", "deployments", "Deployment", true, &["list"])
        .with_resource("apps", "v1", "deployments/scale", "Scale", true, &["get", "patch", "update"])
        .with_instances(&pods, vec![
            json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web-0", "namespace": "default"}, "spec": {"nodeName": "node-a"}}),
            json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "coredns", "namespace": "kube-system"}}),
        ])
        .with_instances(&nodes, vec![json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "node-a"}})])
}

#[tokio::test]
async fn snapshot_lands_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let report = Collector::new(Arc::new(cluster()), CollectConfig::default()).collect(CancellationToken::new()).await.unwrap();
    let persisted = kubesnap_persist::persist(&report.snapshot, &out).unwrap();

    assert!(persisted.is_complete());
    assert!(out.join("pods.json").is_file());
    assert!(out.join("nodes.json").is_file());
    assert!(!out.join("deployments.json").exists());

    let pods: serde_json::Value = serde_json::from_slice(&std::fs::read(out.join("pods.json")).unwrap()).unwrap();
    let names: Vec<_> = pods.as_array().unwrap().iter().map(|p| p["metadata"]["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["web-0", "coredns"]);
    assert_eq!(kubesnap_persist::load(&out).unwrap(), report.snapshot);
}
