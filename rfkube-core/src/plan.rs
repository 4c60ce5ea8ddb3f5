//! Runtime deployment planner
//!
//! Turns credentials, registry mode and backend identity into one Helm
//! invocation. The image source is a single enum, so a plan can carry a
//! local-registry override or a pull secret but never both.

use serde::Deserialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::BackendDescriptor;
use crate::credentials::RuntimeCredentials;
use crate::error::{IoSnafu, Result, YamlSnafu};
use crate::exec::Invocation;
use crate::registry::{RegistryMode, RegistrySpec};
use crate::settings::RuntimeSettings;

/// Static registry pull secret manifest found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSecret {
    pub name: String,
    pub manifest: PathBuf,
}

#[derive(Deserialize)]
struct ManifestHead {
    metadata: ManifestMetadata,
}

#[derive(Deserialize)]
struct ManifestMetadata {
    name: String,
}

impl PullSecret {
    /// Read the secret name from `metadata.name`; `None` when the manifest is absent
    pub fn discover(manifest: &Path) -> Result<Option<Self>> {
        if !manifest.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(manifest).context(IoSnafu { path: manifest })?;
        let head: ManifestHead = serde_yaml::from_str(&content).context(YamlSnafu {
            what: manifest.display().to_string(),
        })?;
        Ok(Some(Self {
            name: head.metadata.name,
            manifest: manifest.to_path_buf(),
        }))
    }
}

/// Where the chart's images come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `registry=<address>/rapidfort`, always re-pulled, no pull secret
    LocalRegistry { registry: String },
    /// The chart's default registry, optionally authenticated
    Public { pull_secret: Option<PullSecret> },
}

/// Fully parameterized Helm deployment of the runtime agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub chart_ref: String,
    pub release: String,
    pub namespace: String,
    pub variant: String,
    pub image_source: ImageSource,
    pub image_tag: Option<String>,
    pub credentials: RuntimeCredentials,
}

/// Everything the planner needs for one attempt
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub registry: &'a RegistrySpec,
    pub credentials: &'a RuntimeCredentials,
    pub backend: &'a BackendDescriptor,
    pub image_tag: Option<&'a str>,
    pub runtime: &'a RuntimeSettings,
    pub secret_manifest: &'a Path,
}

impl DeploymentPlan {
    /// Build a plan; fails before anything else if a credential field is empty
    pub fn build(request: &PlanRequest<'_>) -> Result<Self> {
        request.credentials.validate()?;

        let image_source = match request.registry.mode {
            RegistryMode::Local => ImageSource::LocalRegistry {
                registry: format!("{}/rapidfort", request.registry.address),
            },
            RegistryMode::Remote => ImageSource::Public {
                pull_secret: PullSecret::discover(request.secret_manifest)?,
            },
        };

        Ok(Self {
            chart_ref: request.runtime.chart_ref(),
            release: request.runtime.release.clone(),
            namespace: request.runtime.namespace.clone(),
            variant: request.backend.default_runtime_variant.to_string(),
            image_source,
            image_tag: request
                .image_tag
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string),
            credentials: request.credentials.clone(),
        })
    }

    /// Chart values that depend on the image source and tag
    pub fn value_overrides(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        if let ImageSource::LocalRegistry { registry } = &self.image_source {
            values.insert("registry".to_string(), registry.clone());
            values.insert("imagePullPolicy".to_string(), "Always".to_string());
        }
        if let Some(tag) = &self.image_tag {
            values.insert("imageTag".to_string(), tag.clone());
        }
        values
    }

    pub fn image_pull_secret_name(&self) -> Option<&str> {
        match &self.image_source {
            ImageSource::Public {
                pull_secret: Some(secret),
            } => Some(secret.name.as_str()),
            _ => None,
        }
    }

    pub fn pull_secret(&self) -> Option<&PullSecret> {
        match &self.image_source {
            ImageSource::Public { pull_secret } => pull_secret.as_ref(),
            ImageSource::LocalRegistry { .. } => None,
        }
    }

    /// `helm upgrade --install` arguments; credential values are redacted in logs
    pub fn helm_invocation(&self) -> Invocation {
        let mut inv = Invocation::new(
            "helm",
            [
                "upgrade",
                "--install",
                self.release.as_str(),
                self.chart_ref.as_str(),
                "--namespace",
                self.namespace.as_str(),
                "--create-namespace",
                "--set",
            ],
        )
        .arg(format!("variant={}", self.variant));

        for (key, value) in self.value_overrides() {
            inv = inv.arg("--set-string").arg(format!("{key}={value}"));
        }
        if let Some(secret) = self.image_pull_secret_name() {
            inv = inv
                .arg("--set")
                .arg(format!("imagePullSecrets[0].name={secret}"));
        }

        let creds = &self.credentials;
        for (key, value) in [
            ("secret.rf_access_id", &creds.access_id),
            ("secret.rf_secret_access_key", &creds.secret_key),
            ("secret.rf_root_url", &creds.root_url),
        ] {
            inv = inv.arg("--set-string").arg(format!("{key}={value}"));
        }

        inv.redacting(creds.secret_key.clone())
            .redacting(creds.access_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendId;
    use crate::error::Error;
    use crate::registry::RegistryInputs;

    fn creds() -> RuntimeCredentials {
        RuntimeCredentials {
            access_id: "id-1".into(),
            secret_key: "key-1".into(),
            root_url: "https://us01.rapidfort.com".into(),
        }
    }

    fn plan(registry: &RegistrySpec, tag: Option<&str>, secret: &Path) -> Result<DeploymentPlan> {
        let runtime = RuntimeSettings::default();
        let credentials = creds();
        DeploymentPlan::build(&PlanRequest {
            registry,
            credentials: &credentials,
            backend: BackendId::Kind.descriptor(),
            image_tag: tag,
            runtime: &runtime,
            secret_manifest: secret,
        })
    }

    fn write_secret(dir: &Path) -> PathBuf {
        let path = dir.join("rapidfort-registry-secret.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: rf-regcred\ntype: kubernetes.io/dockerconfigjson\ndata:\n  .dockerconfigjson: e30=\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_local_registry_scenario() {
        let inputs = RegistryInputs {
            env_address: Some("10.0.0.5".into()),
            local_flag: true,
            ..Default::default()
        };
        let registry = RegistrySpec::resolve(&inputs, BackendId::Kind.descriptor()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        // a secret manifest on disk must be ignored in local mode
        let secret = write_secret(dir.path());

        let plan = plan(&registry, Some("9.9.9"), &secret).unwrap();
        let expected: BTreeMap<String, String> = [
            ("registry", "10.0.0.5:5000/rapidfort"),
            ("imageTag", "9.9.9"),
            ("imagePullPolicy", "Always"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(plan.value_overrides(), expected);
        assert_eq!(plan.image_pull_secret_name(), None);
        assert_eq!(plan.variant, "generic");
    }

    #[test]
    fn test_remote_mode_attaches_secret_only_when_present() {
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Remote,
        };
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");

        let without = plan(&registry, None, &missing).unwrap();
        assert!(without.value_overrides().is_empty());
        assert_eq!(without.image_pull_secret_name(), None);

        let secret = write_secret(dir.path());
        let with = plan(&registry, None, &secret).unwrap();
        assert_eq!(with.image_pull_secret_name(), Some("rf-regcred"));
        assert!(!with.value_overrides().contains_key("registry"));
    }

    #[test]
    fn test_overrides_and_secret_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let secret = write_secret(dir.path());
        for mode in [RegistryMode::Local, RegistryMode::Remote] {
            for tag in [None, Some("1.2.3")] {
                let registry = RegistrySpec {
                    address: "10.0.0.5:5000".into(),
                    mode,
                };
                let plan = plan(&registry, tag, &secret).unwrap();
                assert!(
                    !(plan.value_overrides().contains_key("registry")
                        && plan.image_pull_secret_name().is_some())
                );
            }
        }
    }

    #[test]
    fn test_empty_credentials_fail_fast() {
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Local,
        };
        let runtime = RuntimeSettings::default();
        for blank in 0..3 {
            let mut credentials = creds();
            match blank {
                0 => credentials.access_id.clear(),
                1 => credentials.secret_key.clear(),
                _ => credentials.root_url.clear(),
            }
            let err = DeploymentPlan::build(&PlanRequest {
                registry: &registry,
                credentials: &credentials,
                backend: BackendId::K3s.descriptor(),
                image_tag: None,
                runtime: &runtime,
                secret_manifest: Path::new("/nonexistent"),
            })
            .unwrap_err();
            assert!(matches!(err, Error::IncompleteCredentials { .. }));
        }
    }

    #[test]
    fn test_helm_invocation_renders_values_and_redacts() {
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Local,
        };
        let plan = plan(&registry, Some("9.9.9"), Path::new("/nonexistent")).unwrap();
        let inv = plan.helm_invocation();
        assert_eq!(inv.program, "helm");
        assert!(inv.matches("helm", &["upgrade", "--install", "rfruntime", "rapidfort/rfruntime"]));
        assert!(inv.args.contains(&"variant=generic".to_string()));
        assert!(inv.args.contains(&"registry=10.0.0.5:5000/rapidfort".to_string()));
        assert!(!inv.args.iter().any(|a| a.starts_with("imagePullSecrets")));
        assert!(!inv.display().contains("key-1"));
    }
}
