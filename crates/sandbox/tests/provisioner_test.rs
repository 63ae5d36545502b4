//! Provisioner lifecycle tests. These avoid a real Python toolchain: `true`
//! stands in for the interpreter and a stub `pip` script records calls.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use common::Error;
use sandbox::{EnvState, Provisioner, StrategyUnit};

const STUB_PIP: &str = r#"#!/bin/sh
echo "$2" >> "$(dirname "$0")/calls.log"
if [ "$2" = "badpkg" ]; then
    echo "no matching distribution for badpkg" >&2
    exit 1
fi
"#;

fn write_stub_pip(env_dir: &std::path::Path) {
    let bin = env_dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let pip = bin.join("pip");
    std::fs::write(&pip, STUB_PIP).unwrap();
    let mut perm = std::fs::metadata(&pip).unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(&pip, perm).unwrap();
}

#[tokio::test]
async fn duplicate_environment_ids_are_rejected_until_teardown() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("true", root.path());

    let env = prov.create("req-1").await.unwrap();
    assert_eq!(env.state(), EnvState::Created);
    assert_eq!(prov.active_count(), 1);

    match prov.create("req-1").await {
        Err(Error::Provisioning(detail)) => assert!(detail.contains("req-1")),
        other => panic!("expected Provisioning error, got {other:?}"),
    }

    env.teardown().await.unwrap();
    assert_eq!(prov.active_count(), 0);

    // The id is reusable once the first environment is gone.
    let env = prov.create("req-1").await.unwrap();
    env.teardown().await.unwrap();
}

#[tokio::test]
async fn unsafe_environment_ids_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("true", root.path());
    assert!(matches!(
        prov.create("../escape").await,
        Err(Error::Provisioning(_))
    ));
    assert_eq!(prov.active_count(), 0);
}

#[tokio::test]
async fn install_aborts_on_first_failing_dependency() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("true", root.path());

    let mut env = prov.create("req-install").await.unwrap();
    let env_dir = root.path().join("req-install");
    write_stub_pip(&env_dir);

    let packages: Vec<String> = ["numpy", "badpkg", "scipy"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    match env.install(&packages).await {
        Err(Error::DependencyInstall { package, detail }) => {
            assert_eq!(package, "badpkg");
            assert!(detail.contains("no matching distribution"));
        }
        other => panic!("expected DependencyInstall error, got {other:?}"),
    }
    assert_eq!(env.state(), EnvState::Error);

    // The third dependency was never attempted.
    let log = std::fs::read_to_string(env_dir.join("bin/calls.log")).unwrap();
    let attempted: Vec<&str> = log.lines().collect();
    assert_eq!(attempted, ["numpy", "badpkg"]);

    env.teardown().await.unwrap();
    assert!(!env_dir.exists());
    assert_eq!(prov.active_count(), 0);
}

#[tokio::test]
async fn install_runs_dependencies_in_declared_order() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("true", root.path());

    let mut env = prov.create("req-order").await.unwrap();
    let env_dir = root.path().join("req-order");
    write_stub_pip(&env_dir);

    let packages: Vec<String> = ["pandas", "numpy"].iter().map(|s| s.to_string()).collect();
    env.install(&packages).await.unwrap();
    assert_eq!(env.state(), EnvState::Ready);

    let log = std::fs::read_to_string(env_dir.join("bin/calls.log")).unwrap();
    assert_eq!(log.lines().collect::<Vec<_>>(), ["pandas", "numpy"]);

    // A second install on the same environment is a state violation.
    assert!(matches!(
        env.install(&packages).await,
        Err(Error::Provisioning(_))
    ));

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn execute_tears_down_on_failure_paths() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("true", root.path());
    let unit = StrategyUnit {
        source: "def func_strat(data):\n    return data\n".into(),
        requirements: Vec::new(),
    };

    // `true -m venv` creates nothing, so the driver fails writing artifacts.
    let result = sandbox::execute(&prov, "req-x", &unit, "{}", Duration::from_secs(5)).await;
    assert!(result.is_err());

    // Environment directory gone, id released for the next request.
    assert!(!root.path().join("req-x").exists());
    assert_eq!(prov.active_count(), 0);
    let env = prov.create("req-x").await.unwrap();
    env.teardown().await.unwrap();
}
