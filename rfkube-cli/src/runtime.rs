//! Runtime agent deployment
//!
//! Executes a [`DeploymentPlan`]: chart repository, optional image mirroring
//! into the local registry, optional pull secret, `helm upgrade --install`,
//! then waits for the runtime pods.

use tracing::{info, warn};

use rfkube_core::error::Result;
use rfkube_core::{DeploymentPlan, ImageSource, Invocation};

use crate::context::HostContext;
use crate::{kube, ui};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOutcome {
    pub release: String,
    pub namespace: String,
    pub pods_ready: usize,
    /// Image references pushed into the local registry
    pub mirrored: Vec<String>,
}

/// `10.0.0.5:5000/rapidfort` → `localhost:5000/rapidfort`
fn loopback_prefix(registry: &str) -> String {
    let (address, path) = registry.split_once('/').unwrap_or((registry, ""));
    let port = address
        .rsplit_once(':')
        .map_or("5000", |(_, port)| port);
    if path.is_empty() {
        format!("localhost:{port}")
    } else {
        format!("localhost:{port}/{path}")
    }
}

pub async fn deploy(host: &HostContext, plan: &DeploymentPlan) -> Result<RuntimeOutcome> {
    // nothing may reach helm with partial credentials
    plan.credentials.validate()?;

    ui::header(&format!(
        "Deploying {} ({}) into {}",
        plan.release, plan.variant, plan.namespace
    ));
    let runtime = &host.settings.runtime;

    host.run_checked(&host.helm([
        "repo",
        "add",
        runtime.repo_name.as_str(),
        runtime.repo_url.as_str(),
        "--force-update",
    ]))
    .await?;
    host.run_checked(&host.helm(["repo", "update"])).await?;

    let mirrored = match &plan.image_source {
        ImageSource::LocalRegistry { registry } => {
            mirror_images(host, registry, plan.image_tag.as_deref()).await?
        }
        ImageSource::Public { .. } => Vec::new(),
    };

    if let Some(secret) = plan.pull_secret() {
        ensure_namespace(host, &plan.namespace).await?;
        let manifest = secret.manifest.to_string_lossy().into_owned();
        host.run_checked(&host.kubectl([
            "apply",
            "-n",
            plan.namespace.as_str(),
            "-f",
            manifest.as_str(),
        ]))
        .await?;
        ui::info(&format!("applied image pull secret {}", secret.name));
    }

    let helm = plan.helm_invocation().env(
        "KUBECONFIG",
        host.kubeconfig.path().to_string_lossy().into_owned(),
    );
    info!(command = %helm.display(), "installing runtime chart");
    if let Err(e) = host.run_checked(&helm).await {
        let dump = kube::describe(host, "pods", Some(&plan.namespace)).await;
        return Err(e.with_diagnostics(dump));
    }

    let spec = host.settings.timeouts.spec(
        format!("{} pods in {}", plan.release, plan.namespace),
        host.settings.timeouts.runtime_ready_secs,
    );
    let pods_ready = match kube::wait_pods_settled(host, Some(&plan.namespace), &spec).await {
        Ok(pods) => pods,
        Err(e) => {
            let dump = kube::describe(host, "pods", Some(&plan.namespace)).await;
            warn!(namespace = %plan.namespace, "runtime pods not ready");
            ui::detail(&dump);
            return Err(e.with_diagnostics(dump));
        }
    };

    ui::success(&format!("{} is running ({pods_ready} pods)", plan.release));
    Ok(RuntimeOutcome {
        release: plan.release.clone(),
        namespace: plan.namespace.clone(),
        pods_ready,
        mirrored,
    })
}

async fn ensure_namespace(host: &HostContext, namespace: &str) -> Result<()> {
    let manifest = host
        .run_checked(&host.kubectl([
            "create",
            "namespace",
            namespace,
            "--dry-run=client",
            "-o",
            "yaml",
        ]))
        .await?
        .stdout;
    host.run_checked(&host.kubectl(["apply", "-f", "-"]).stdin(manifest))
        .await?;
    Ok(())
}

/// Copy the configured runtime images from the public registry into `registry`
async fn mirror_images(host: &HostContext, registry: &str, tag: Option<&str>) -> Result<Vec<String>> {
    let runtime = &host.settings.runtime;
    let tag = tag.unwrap_or("latest");
    let push_prefix = loopback_prefix(registry);

    let mut mirrored = Vec::with_capacity(runtime.mirror_images.len());
    for image in &runtime.mirror_images {
        let source = format!("{}/{image}:{tag}", runtime.public_registry);
        let target = format!("{push_prefix}/{image}:{tag}");
        ui::info(&format!("mirroring {source} → {registry}/{image}:{tag}"));
        host.run_checked(&Invocation::new("docker", ["pull", source.as_str()]))
            .await?;
        host.run_checked(&Invocation::new(
            "docker",
            ["tag", source.as_str(), target.as_str()],
        ))
        .await?;
        host.run_checked(&Invocation::new("docker", ["push", target.as_str()]))
            .await?;
        mirrored.push(format!("{registry}/{image}:{tag}"));
    }
    Ok(mirrored)
}
