//! Local insecure registry reconciliation
//!
//! Makes the registry exist and answer, teaches the backend to trust it over
//! plain HTTP, and then proves the trust works by pulling a freshly pushed
//! image from inside the cluster. Everything up to the trust reload is fatal;
//! the round trip only produces a warning.

use k8s_openapi::api::core::v1::Pod;
use tera::Context;
use tracing::{debug, info, warn};

use rfkube_core::error::{Error, Result};
use rfkube_core::{Check, Invocation, RegistryProvisioner, RegistrySpec, poll_until};

use crate::adapters::BackendAdapter;
use crate::adapters::zuul::REGISTRY_DATA_DIR;
use crate::context::HostContext;
use crate::{kube, templates, ui};

/// What step 1 had to do to make the registry exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    Created,
    /// A stopped container was started again
    Started,
    Existing,
    /// The in-cluster manifest was applied
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub address: String,
    pub action: RegistryAction,
    pub trust_verified: bool,
    pub trust_warning: Option<String>,
}

pub async fn reconcile(
    adapter: &dyn BackendAdapter,
    host: &HostContext,
    registry: &RegistrySpec,
) -> Result<ReconcileReport> {
    let id = adapter.id();
    let state = adapter.status(host).await?;
    if !state.is_running() {
        return Err(Error::NotRunning {
            backend: id.to_string(),
            phase: state.phase.to_string(),
        });
    }

    ui::header(&format!("Reconciling registry {} for {id}", registry.address));

    let action = match adapter.descriptor().registry_provisioner {
        RegistryProvisioner::HostContainer => {
            ensure_container(host, registry, adapter.cluster_network()).await?
        }
        RegistryProvisioner::InClusterNodePort => apply_in_cluster(host, registry).await?,
    };
    info!(backend = %id, ?action, "registry present");

    wait_registry_ready(host, registry).await?;
    ui::success(&format!("registry answers at {}", registry.api_url()));

    adapter.configure_registry_trust(host, registry).await?;
    adapter.reload_registry_trust(host).await?;
    kube::wait_nodes_ready(host, host.settings.timeouts.cluster_ready_secs).await?;
    ui::success("registry trust configured");

    let (trust_verified, trust_warning) = match verify_round_trip(host, registry).await {
        Ok(()) => {
            ui::success("cluster pulled a test image from the local registry");
            (true, None)
        }
        Err(e) => {
            ui::warning(&format!("registry trust round trip failed: {e}"));
            (false, Some(e.to_string()))
        }
    };

    Ok(ReconcileReport {
        address: registry.address.clone(),
        action,
        trust_verified,
        trust_warning,
    })
}

/// Existing container state: `Some(true)` running, `Some(false)` stopped
fn container_state(ps_output: &str, name: &str) -> Option<bool> {
    ps_output.lines().find_map(|line| {
        let (found, status) = line.split_once("|||")?;
        (found.trim() == name).then(|| status.trim().starts_with("Up"))
    })
}

async fn ensure_container(
    host: &HostContext,
    registry: &RegistrySpec,
    network: Option<&str>,
) -> Result<RegistryAction> {
    let settings = &host.settings.registry;
    let name = settings.container_name.as_str();

    let ps = host
        .run_checked(&Invocation::new(
            "docker",
            [
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                format!("name=^{name}$"),
                "--format".to_string(),
                "{{.Names}}|||{{.Status}}".to_string(),
            ],
        ))
        .await?;

    let action = match container_state(&ps.stdout, name) {
        Some(true) => RegistryAction::Existing,
        Some(false) => {
            ui::info(&format!("starting stopped registry container {name}"));
            host.run_checked(&Invocation::new("docker", ["start", name]))
                .await?;
            RegistryAction::Started
        }
        None => {
            ui::info(&format!("creating registry container {name}"));
            host.run_checked(&Invocation::new(
                "docker",
                ["volume", "create", settings.volume.as_str()],
            ))
            .await?;
            host.run_checked(&Invocation::new(
                "docker",
                [
                    "run".to_string(),
                    "-d".to_string(),
                    "--restart=always".to_string(),
                    "--name".to_string(),
                    name.to_string(),
                    "-p".to_string(),
                    format!("{}:5000", registry.port()),
                    "-v".to_string(),
                    format!("{}:/var/lib/registry", settings.volume),
                    settings.image.clone(),
                ],
            ))
            .await?;
            RegistryAction::Created
        }
    };

    if let Some(network) = network {
        let connect = Invocation::new("docker", ["network", "connect", network, name]);
        let out = host.run(&connect).await?;
        if !out.success() && !out.stderr.contains("already exists") {
            out.into_result(&connect)?;
        }
        debug!(network, "registry attached to cluster network");
    }
    Ok(action)
}

async fn apply_in_cluster(host: &HostContext, registry: &RegistrySpec) -> Result<RegistryAction> {
    let settings = &host.settings.registry;
    let mut ctx = Context::new();
    ctx.insert("namespace", &settings.namespace);
    ctx.insert("name", &settings.container_name);
    ctx.insert("image", &settings.image);
    ctx.insert("node_port", &registry.port());
    ctx.insert("host_path", REGISTRY_DATA_DIR);
    let manifest = templates::render("registry-incluster.yaml", &ctx)?;

    host.run_checked(&host.kubectl(["apply", "-f", "-"]).stdin(manifest))
        .await?;
    Ok(RegistryAction::Applied)
}

async fn wait_registry_ready(host: &HostContext, registry: &RegistrySpec) -> Result<()> {
    let url = registry.api_url();
    let spec = host.settings.timeouts.spec(
        format!("registry {url}"),
        host.settings.timeouts.registry_ready_secs,
    );
    poll_until(&spec, || async {
        match host.http.status(&url).await {
            Ok(200) => Check::Ready(()),
            Ok(status) => Check::Pending(format!("HTTP {status}")),
            Err(e) => Check::Pending(e.to_string()),
        }
    })
    .await?;
    Ok(())
}

/// Push a uniquely tagged image and have the cluster pull it by the registry address
async fn verify_round_trip(host: &HostContext, registry: &RegistrySpec) -> Result<()> {
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let run_id = &run_id[..8];
    let source = host.settings.registry.test_image.as_str();
    let repository = format!("rapidfort/rf-trust-check:{run_id}");
    let push_ref = format!("{}/{repository}", registry.push_address());
    let pull_ref = format!("{}/{repository}", registry.address);
    let pod = format!("rf-trust-check-{run_id}");

    host.run_checked(&Invocation::new("docker", ["pull", source]))
        .await?;
    host.run_checked(&Invocation::new("docker", ["tag", source, push_ref.as_str()]))
        .await?;
    host.run_checked(&Invocation::new("docker", ["push", push_ref.as_str()]))
        .await?;

    host.run_checked(&host.kubectl([
        "run".to_string(),
        pod.clone(),
        format!("--image={pull_ref}"),
        "--restart=Never".to_string(),
        "--image-pull-policy=Always".to_string(),
        "--command".to_string(),
        "--".to_string(),
        "true".to_string(),
    ]))
    .await?;

    let spec = host.settings.timeouts.spec(
        format!("pod {pod} pulling {pull_ref}"),
        host.settings.timeouts.trust_check_secs,
    );
    let pulled = poll_until(&spec, || check_image_pulled(host, &pod)).await;

    let cleanup = host
        .run(&host.kubectl(["delete", "pod", pod.as_str(), "--ignore-not-found", "--wait=false"]))
        .await;
    if let Err(e) = cleanup {
        warn!(pod = %pod, error = %e, "could not delete trust-check pod");
    }
    pulled?;
    Ok(())
}

async fn check_image_pulled(host: &HostContext, pod: &str) -> Check<()> {
    let out = match host.run(&host.kubectl(["get", "pod", pod, "-o", "json"])).await {
        Ok(out) if out.success() => out,
        Ok(out) => return Check::Pending(out.stderr.trim().to_string()),
        Err(e) => return Check::Pending(e.to_string()),
    };
    let pod: Pod = match serde_json::from_str(&out.stdout) {
        Ok(pod) => pod,
        Err(e) => return Check::Pending(format!("unparseable pod: {e}")),
    };
    let status = pod.status.unwrap_or_default();
    match status.phase.as_deref() {
        Some("Running" | "Succeeded") => return Check::Ready(()),
        Some("Failed") => return Check::Pending("trust-check pod failed".to_string()),
        _ => {}
    }
    let waiting = status
        .container_statuses
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.state?.waiting?.reason)
        .collect::<Vec<_>>();
    if waiting.is_empty() {
        Check::Pending("pod pending".to_string())
    } else {
        Check::Pending(waiting.join(", "))
    }
}
