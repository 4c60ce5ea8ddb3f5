use assert_cmd::Command;

fn rfkube(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("rfkube").unwrap();
    cmd.env("HOME", home)
        .env_remove("RFKUBE_CONFIG")
        .env_remove("RF_LOCAL_REGISTRY")
        .env_remove("INSTALL_DEPS");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = rfkube(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["cluster", "test-all", "list", "check-deps"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_cluster_help_lists_actions() {
    let home = tempfile::tempdir().unwrap();
    let output = rfkube(home.path())
        .args(["cluster", "--help"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("deploy-rapidfort"));
    assert!(stdout.contains("--local-registry"));
    assert!(stdout.contains("--keep-cluster"));
}

#[test]
fn test_list_without_state() {
    let home = tempfile::tempdir().unwrap();
    let output = rfkube(home.path()).arg("list").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for backend in ["kubeadm", "k0s", "k3s", "k3d", "kind", "microk8s", "minikube", "zuul"] {
        assert!(stdout.contains(backend), "missing {backend} in list");
    }
    assert!(stdout.contains("nodeport:30500"));
}

#[test]
fn test_unknown_backend_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let output = rfkube(home.path())
        .args(["cluster", "openshift", "install"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown backend `openshift`"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = rfkube(home.path())
        .args(["--config", "/nonexistent/rfkube.toml", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load settings"));
}
