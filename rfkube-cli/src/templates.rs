//! Embedded tera templates for cluster and registry manifests

use rfkube_core::error::{Error, Result};
use tera::{Context, Tera};

const TEMPLATES: &[(&str, &str)] = &[
    ("kind-config.yaml", include_str!("templates/kind-config.yaml")),
    ("hosts.toml", include_str!("templates/hosts.toml")),
    (
        "local-registry-hosting.yaml",
        include_str!("templates/local-registry-hosting.yaml"),
    ),
    (
        "k0s-containerd-registry.toml",
        include_str!("templates/k0s-containerd-registry.toml"),
    ),
    (
        "registry-incluster.yaml",
        include_str!("templates/registry-incluster.yaml"),
    ),
];

/// Render one embedded template
pub fn render(name: &str, context: &Context) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TEMPLATES.iter().copied())
        .map_err(|e| render_error(name, &e))?;
    tera.render(name, context).map_err(|e| render_error(name, &e))
}

/// containerd `hosts.toml` trusting `address` over plain HTTP
pub fn hosts_toml(address: &str) -> Result<String> {
    let mut ctx = Context::new();
    ctx.insert("address", address);
    render("hosts.toml", &ctx)
}

fn render_error(name: &str, err: &tera::Error) -> Error {
    // tera nests the useful message in the source chain
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message = format!("{message}: {inner}");
        source = inner.source();
    }
    Error::Render {
        name: name.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_hosts_toml_is_valid_toml() {
        let rendered = hosts_toml("10.0.0.5:5000").unwrap();
        let parsed: toml::Table = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed["server"].as_str(), Some("http://10.0.0.5:5000"));
        let host = parsed["host"]["http://10.0.0.5:5000"].as_table().unwrap();
        assert_eq!(host["skip_verify"].as_bool(), Some(true));
    }

    #[test]
    fn test_incluster_registry_manifest() {
        let mut ctx = Context::new();
        ctx.insert("namespace", "rf-registry");
        ctx.insert("name", "rf-registry");
        ctx.insert("image", "registry:2");
        ctx.insert("node_port", &30500);
        ctx.insert("host_path", "/var/lib/rf-registry");
        let rendered = render("registry-incluster.yaml", &ctx).unwrap();

        let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&rendered)
            .map(serde_yaml::Value::deserialize)
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2]["spec"]["ports"][0]["nodePort"].as_u64(), Some(30500));
    }

    #[test]
    fn test_missing_variable_is_render_error() {
        let err = render("kind-config.yaml", &Context::new()).unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }
}
