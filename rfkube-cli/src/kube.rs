//! kubectl-backed readiness predicates and diagnostics
//!
//! kubectl output is parsed into `k8s-openapi` types so readiness rules read
//! like the API objects they inspect.

use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use rfkube_core::error::Result;
use rfkube_core::{Check, PollSpec, poll_until};

use crate::context::HostContext;

/// `kubectl get ... -o json` list envelope
#[derive(Deserialize)]
struct ItemList<T> {
    items: Vec<T>,
}

fn parse_items<T: DeserializeOwned>(json: &str) -> std::result::Result<Vec<T>, String> {
    serde_json::from_str::<ItemList<T>>(json)
        .map(|list| list.items)
        .map_err(|e| format!("unparseable kubectl output: {e}"))
}

pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Running with every container ready, or finished successfully
pub fn pod_is_settled(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => true,
        Some("Running") => status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready)),
        _ => false,
    }
}

fn pod_name(pod: &Pod) -> String {
    let ns = pod.metadata.namespace.as_deref().unwrap_or("default");
    let name = pod.metadata.name.as_deref().unwrap_or("?");
    format!("{ns}/{name}")
}

/// One evaluation of "every node is Ready"
pub async fn check_nodes_ready(host: &HostContext) -> Check<usize> {
    let inv = host.kubectl(["get", "nodes", "-o", "json"]);
    let out = match host.run(&inv).await {
        Ok(out) if out.success() => out,
        Ok(out) => return Check::Pending(format!("API not reachable: {}", out.stderr.trim())),
        Err(e) => return Check::Pending(e.to_string()),
    };
    match parse_items::<Node>(&out.stdout) {
        Ok(nodes) if nodes.is_empty() => Check::Pending("no nodes registered".to_string()),
        Ok(nodes) => {
            let ready = nodes.iter().filter(|n| node_is_ready(n)).count();
            if ready == nodes.len() {
                Check::Ready(ready)
            } else {
                Check::Pending(format!("{ready}/{} nodes Ready", nodes.len()))
            }
        }
        Err(msg) => Check::Pending(msg),
    }
}

/// One evaluation of "every pod in `namespace` (or all namespaces) is Running/Completed"
pub async fn check_pods_settled(host: &HostContext, namespace: Option<&str>) -> Check<usize> {
    let mut args = vec!["get".to_string(), "pods".to_string()];
    match namespace {
        Some(ns) => args.extend(["-n".to_string(), ns.to_string()]),
        None => args.push("--all-namespaces".to_string()),
    }
    args.extend(["-o".to_string(), "json".to_string()]);

    let out = match host.run(&host.kubectl(args)).await {
        Ok(out) if out.success() => out,
        Ok(out) => return Check::Pending(out.stderr.trim().to_string()),
        Err(e) => return Check::Pending(e.to_string()),
    };
    match parse_items::<Pod>(&out.stdout) {
        Ok(pods) if pods.is_empty() => Check::Pending("no pods scheduled yet".to_string()),
        Ok(pods) => {
            let waiting: Vec<String> = pods
                .iter()
                .filter(|p| !pod_is_settled(p))
                .map(pod_name)
                .collect();
            if waiting.is_empty() {
                Check::Ready(pods.len())
            } else {
                Check::Pending(format!("waiting on {}", waiting.join(", ")))
            }
        }
        Err(msg) => Check::Pending(msg),
    }
}

pub async fn wait_nodes_ready(host: &HostContext, timeout_secs: u64) -> Result<usize> {
    let spec = host.settings.timeouts.spec("cluster nodes Ready", timeout_secs);
    Ok(poll_until(&spec, || check_nodes_ready(host)).await?)
}

pub async fn wait_pods_settled(
    host: &HostContext,
    namespace: Option<&str>,
    spec: &PollSpec,
) -> Result<usize> {
    Ok(poll_until(spec, || check_pods_settled(host, namespace)).await?)
}

/// `kubectl describe` output for context on failures; empty when unavailable
pub async fn describe(host: &HostContext, kind: &str, namespace: Option<&str>) -> String {
    let mut args = vec!["describe".to_string(), kind.to_string()];
    match namespace {
        Some(ns) => args.extend(["-n".to_string(), ns.to_string()]),
        None => args.push("--all-namespaces".to_string()),
    }
    match host.run(&host.kubectl(args)).await {
        Ok(out) => out.stdout,
        Err(e) => {
            warn!(error = %e, "kubectl describe failed");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{READY_NODES, READY_PODS, context, healthy_runner};
    use rfkube_core::CmdOutput;
    use rfkube_core::testing::StaticProbe;
    use std::sync::Arc;

    const NOT_READY_PODS: &str = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"rfruntime-abc","namespace":"rapidfort"},
         "status":{"phase":"Pending"}},
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"sentry-1","namespace":"rapidfort"},
         "status":{"phase":"Running","containerStatuses":[{"name":"s","ready":false,"restartCount":2,"image":"s","imageID":""}]}}]}"#;

    #[test]
    fn test_parse_ready_fixtures() {
        let nodes = parse_items::<Node>(READY_NODES).unwrap();
        assert!(nodes.iter().all(node_is_ready));
        let pods = parse_items::<Pod>(READY_PODS).unwrap();
        assert!(pods.iter().all(pod_is_settled));
        let pods = parse_items::<Pod>(NOT_READY_PODS).unwrap();
        assert!(!pods.iter().any(pod_is_settled));
    }

    #[tokio::test]
    async fn test_check_pods_reports_waiting_pods() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner
            .on("kubectl", &["get", "pods", "-n", "rapidfort"])
            .respond(CmdOutput::ok(NOT_READY_PODS));
        let host = context(dir.path(), runner, Arc::new(StaticProbe::new(vec![200])));

        match check_pods_settled(&host, Some("rapidfort")).await {
            Check::Pending(msg) => {
                assert!(msg.contains("rapidfort/rfruntime-abc"));
                assert!(msg.contains("rapidfort/sentry-1"));
            }
            Check::Ready(_) => panic!("pods should not be settled"),
        }
        assert_eq!(check_pods_settled(&host, None).await, Check::Ready(2));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner
            .on("kubectl", &["get", "nodes"])
            .respond(CmdOutput::failed(1, "connection refused"));
        let host = context(dir.path(), runner, Arc::new(StaticProbe::new(vec![200])));
        assert!(matches!(check_nodes_ready(&host).await, Check::Pending(msg) if msg.contains("connection refused")));
        assert!(wait_nodes_ready(&host, 1).await.is_err());
    }
}
