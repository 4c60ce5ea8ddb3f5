//! Backend catalog
//!
//! One immutable [`BackendDescriptor`] per supported cluster technology.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Supported cluster backends, in batch-run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Kubeadm,
    K0s,
    K3s,
    K3d,
    Kind,
    Microk8s,
    Minikube,
    Zuul,
}

impl BackendId {
    pub const ALL: [BackendId; 8] = [
        BackendId::Kubeadm,
        BackendId::K0s,
        BackendId::K3s,
        BackendId::K3d,
        BackendId::Kind,
        BackendId::Microk8s,
        BackendId::Minikube,
        BackendId::Zuul,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Kubeadm => "kubeadm",
            BackendId::K0s => "k0s",
            BackendId::K3s => "k3s",
            BackendId::K3d => "k3d",
            BackendId::Kind => "kind",
            BackendId::Microk8s => "microk8s",
            BackendId::Minikube => "minikube",
            BackendId::Zuul => "zuul",
        }
    }

    /// Static descriptor for this backend
    pub fn descriptor(self) -> &'static BackendDescriptor {
        match self {
            BackendId::Kubeadm => &KUBEADM,
            BackendId::K0s => &K0S,
            BackendId::K3s => &K3S,
            BackendId::K3d => &K3D,
            BackendId::Kind => &KIND,
            BackendId::Microk8s => &MICROK8S,
            BackendId::Minikube => &MINIKUBE,
            BackendId::Zuul => &ZUUL,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or(Error::UnknownBackend {
                name: s.to_string(),
            })
    }
}

/// How the local insecure registry is provided for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryProvisioner {
    /// A `registry:2` container on the host's container runtime
    HostContainer,
    /// A Deployment + NodePort Service inside the cluster itself
    InClusterNodePort,
}

/// Immutable facts about one backend
#[derive(Debug, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub supports_local_registry_mirror: bool,
    /// Value passed to the runtime chart's `variant`
    pub default_runtime_variant: &'static str,
    /// Port appended to a bare registry host
    pub registry_port: u16,
    pub registry_provisioner: RegistryProvisioner,
}

static KUBEADM: BackendDescriptor = BackendDescriptor {
    id: BackendId::Kubeadm,
    supports_local_registry_mirror: true,
    default_runtime_variant: "generic",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static K0S: BackendDescriptor = BackendDescriptor {
    id: BackendId::K0s,
    supports_local_registry_mirror: true,
    default_runtime_variant: "k0s",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static K3S: BackendDescriptor = BackendDescriptor {
    id: BackendId::K3s,
    supports_local_registry_mirror: true,
    default_runtime_variant: "k3s",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static K3D: BackendDescriptor = BackendDescriptor {
    id: BackendId::K3d,
    supports_local_registry_mirror: true,
    default_runtime_variant: "k3s",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static KIND: BackendDescriptor = BackendDescriptor {
    id: BackendId::Kind,
    supports_local_registry_mirror: true,
    default_runtime_variant: "generic",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static MICROK8S: BackendDescriptor = BackendDescriptor {
    id: BackendId::Microk8s,
    supports_local_registry_mirror: true,
    default_runtime_variant: "microk8s",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static MINIKUBE: BackendDescriptor = BackendDescriptor {
    id: BackendId::Minikube,
    supports_local_registry_mirror: true,
    default_runtime_variant: "generic",
    registry_port: 5000,
    registry_provisioner: RegistryProvisioner::HostContainer,
};

static ZUUL: BackendDescriptor = BackendDescriptor {
    id: BackendId::Zuul,
    supports_local_registry_mirror: true,
    default_runtime_variant: "generic",
    registry_port: 30500,
    registry_provisioner: RegistryProvisioner::InClusterNodePort,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for id in BackendId::ALL {
            assert_eq!(id.as_str().parse::<BackendId>().unwrap(), id);
            assert_eq!(id.descriptor().id, id);
        }
        assert_eq!("KinD".parse::<BackendId>().unwrap(), BackendId::Kind);
    }

    #[test]
    fn test_unknown_backend_is_precondition_error() {
        let err = "openshift".parse::<BackendId>().unwrap_err();
        assert!(matches!(err, Error::UnknownBackend { .. }));
    }

    #[test]
    fn test_runtime_variants() {
        assert_eq!(BackendId::K0s.descriptor().default_runtime_variant, "k0s");
        assert_eq!(BackendId::K3d.descriptor().default_runtime_variant, "k3s");
        assert_eq!(BackendId::Kind.descriptor().default_runtime_variant, "generic");
        assert_eq!(BackendId::Zuul.descriptor().registry_port, 30500);
    }
}
