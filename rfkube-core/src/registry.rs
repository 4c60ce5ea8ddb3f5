//! Local registry address resolution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::backend::BackendDescriptor;
use crate::error::{Error, Result};

/// Where the runtime images are pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryMode {
    /// Public chart registry
    Remote,
    /// The freshly provisioned local insecure registry
    Local,
}

/// Resolved registry for one install run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    /// `host:port`
    pub address: String,
    pub mode: RegistryMode,
}

/// Raw inputs the registry spec is derived from
#[derive(Debug, Clone, Default)]
pub struct RegistryInputs {
    /// `RF_LOCAL_REGISTRY`
    pub env_address: Option<String>,
    /// `--registry-ip`
    pub flag_address: Option<String>,
    pub detected_ip: Option<Ipv4Addr>,
    /// `--local-registry`
    pub local_flag: bool,
    /// `RF_USE_LOCAL_REGISTRY`
    pub env_use_local: Option<String>,
}

impl RegistrySpec {
    /// Resolve the address with precedence env > flag > detected host IP
    pub fn resolve(inputs: &RegistryInputs, backend: &BackendDescriptor) -> Result<Self> {
        let raw = inputs
            .env_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                inputs
                    .flag_address
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
            })
            .or_else(|| inputs.detected_ip.map(|ip| ip.to_string()))
            .ok_or(Error::RegistryAddressUnset {})?;

        let address = normalize_address(&raw, backend.registry_port)?;
        let local = inputs.local_flag || inputs.env_use_local.as_deref().is_some_and(is_truthy);
        let mode = if local {
            if !backend.supports_local_registry_mirror {
                return Err(Error::LocalRegistryUnsupported {
                    backend: backend.id.to_string(),
                });
            }
            RegistryMode::Local
        } else {
            RegistryMode::Remote
        };

        Ok(Self { address, mode })
    }

    pub fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map_or(self.address.as_str(), |(host, _)| host)
    }

    pub fn port(&self) -> u16 {
        self.address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(5000)
    }

    /// Registry API root used for health checks
    pub fn api_url(&self) -> String {
        format!("http://{}/v2/", self.address)
    }

    /// Address the host's container runtime pushes to (loopback is trusted by default)
    pub fn push_address(&self) -> String {
        format!("localhost:{}", self.port())
    }

    pub fn is_local(&self) -> bool {
        self.mode == RegistryMode::Local
    }
}

impl fmt::Display for RegistrySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.address, self.mode)
    }
}

/// Accept `1`, `true`, `yes`, `on` (any case)
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_address(raw: &str, default_port: u16) -> Result<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');

    let invalid = |reason: &str| Error::InvalidRegistryAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
            (host, port)
        }
        None => (trimmed, default_port),
    };

    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    if host.contains('/') || host.contains(char::is_whitespace) {
        return Err(invalid("host must be a bare hostname or IP"));
    }
    if port == 0 {
        return Err(invalid("port must be non-zero"));
    }

    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendId;

    fn inputs() -> RegistryInputs {
        RegistryInputs {
            detected_ip: Some(Ipv4Addr::new(192, 168, 1, 20)),
            ..Default::default()
        }
    }

    #[test]
    fn test_env_beats_flag_beats_detection() {
        let kind = BackendId::Kind.descriptor();
        let mut i = inputs();
        assert_eq!(
            RegistrySpec::resolve(&i, kind).unwrap().address,
            "192.168.1.20:5000"
        );

        i.flag_address = Some("10.1.1.1".into());
        assert_eq!(RegistrySpec::resolve(&i, kind).unwrap().address, "10.1.1.1:5000");

        i.env_address = Some("10.0.0.5".into());
        assert_eq!(RegistrySpec::resolve(&i, kind).unwrap().address, "10.0.0.5:5000");
    }

    #[test]
    fn test_local_mode_needs_mirror_support() {
        static NO_MIRROR: BackendDescriptor = BackendDescriptor {
            id: BackendId::Kind,
            supports_local_registry_mirror: false,
            default_runtime_variant: "kind",
            registry_port: 5000,
            registry_provisioner: crate::backend::RegistryProvisioner::HostContainer,
        };
        let mut i = inputs();
        assert_eq!(
            RegistrySpec::resolve(&i, &NO_MIRROR).unwrap().mode,
            RegistryMode::Remote
        );

        i.local_flag = true;
        let err = RegistrySpec::resolve(&i, &NO_MIRROR).unwrap_err();
        assert!(matches!(err, Error::LocalRegistryUnsupported { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
        assert!(RegistrySpec::resolve(&i, BackendId::Kind.descriptor()).unwrap().is_local());
    }

    #[test]
    fn test_backend_port_and_explicit_port() {
        let mut i = inputs();
        let spec = RegistrySpec::resolve(&i, BackendId::Zuul.descriptor()).unwrap();
        assert_eq!(spec.address, "192.168.1.20:30500");
        assert_eq!(spec.port(), 30500);
        assert_eq!(spec.push_address(), "localhost:30500");

        i.env_address = Some("http://registry.lan:5443/".into());
        let spec = RegistrySpec::resolve(&i, BackendId::Zuul.descriptor()).unwrap();
        assert_eq!(spec.address, "registry.lan:5443");
        assert_eq!(spec.host(), "registry.lan");
    }

    #[test]
    fn test_mode_from_flag_or_env() {
        let kind = BackendId::Kind.descriptor();
        let mut i = inputs();
        assert_eq!(RegistrySpec::resolve(&i, kind).unwrap().mode, RegistryMode::Remote);

        i.env_use_local = Some("TRUE".into());
        assert!(RegistrySpec::resolve(&i, kind).unwrap().is_local());

        i.env_use_local = Some("0".into());
        i.local_flag = true;
        assert!(RegistrySpec::resolve(&i, kind).unwrap().is_local());
    }

    #[test]
    fn test_unset_and_invalid_addresses() {
        let kind = BackendId::Kind.descriptor();
        let err = RegistrySpec::resolve(&RegistryInputs::default(), kind).unwrap_err();
        assert!(matches!(err, Error::RegistryAddressUnset {}));

        let i = RegistryInputs {
            flag_address: Some("10.0.0.5:http".into()),
            ..Default::default()
        };
        let err = RegistrySpec::resolve(&i, kind).unwrap_err();
        assert!(matches!(err, Error::InvalidRegistryAddress { .. }));
    }
}
