mod common;

use common::{events, payloads, Fixture};
use strata_capability::Actor;
use strata_install::{uninstall, Orchestrator, PackageState};
use strata_ledger::streams;
use strata_package::{SeedRegistry, Tier};

/// G0 <- T0 <- {T1-001, T1-002} <- T2
fn layered(fx: &Fixture) -> SeedRegistry {
    fx.registry(vec![
        fx.seed("PKG-G0-001", Tier::G0, &[], &[("boot", b"g0")]),
        fx.seed("PKG-T0-001", Tier::T0, &["PKG-G0-001"], &[("core", b"t0")]),
        fx.seed("PKG-T1-001", Tier::T1, &["PKG-T0-001"], &[("lib/a", b"t1a")]),
        fx.seed("PKG-T1-002", Tier::T1, &["PKG-T0-001"], &[("lib/b", b"t1b")]),
        fx.seed("PKG-T2-001", Tier::T2, &["PKG-T1-001"], &[("app", b"t2")]),
    ])
}

#[tokio::test]
async fn full_plan_installs_every_tier_in_order() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();

    let report = Orchestrator::new(&session, &registry).install_plan().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.installed.len(), 5);
    let tiers: Vec<Tier> = report.tiers.iter().map(|t| t.tier).collect();
    assert_eq!(tiers, vec![Tier::G0, Tier::T0, Tier::T1, Tier::T2]);
    assert_eq!(report.tiers[2].attempted, 2);
    assert_eq!(report.tiers[2].installed, 2);

    // Tier barrier: no T1 install is recorded before the T0 install.
    let installs: Vec<String> = payloads(&fx.root(), streams::PACKAGE)
        .into_iter()
        .filter(|(e, _)| e == "INSTALL")
        .map(|(_, p)| p["tier"].as_str().unwrap().to_string())
        .collect();
    let mut sorted = installs.clone();
    sorted.sort();
    assert_eq!(installs, sorted);
    assert!(session.ledger().verify_all().unwrap().values().all(|r| r.valid));
}

#[tokio::test]
async fn lower_tier_failure_is_scored_and_blocks_later_tiers() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    std::fs::write(fx.store().join("PKG-T1-002.tar.gz"), b"corrupt").unwrap();
    let session = fx.session();

    let report = Orchestrator::new(&session, &registry).install_plan().await.unwrap();
    assert!(!report.is_complete());

    let t1 = &report.tiers[2];
    assert_eq!((t1.attempted, t1.installed, t1.failed), (2, 1, 1));
    assert_eq!(t1.failures["PKG-T1-002"], "HASH_MISMATCH");

    let t2 = &report.tiers[3];
    assert_eq!((t2.attempted, t2.installed, t2.failed), (1, 0, 1));
    assert_eq!(t2.failures["PKG-T2-001"], "DEPENDENCY_UNSATISFIED");
    assert!(!fx.installed("PKG-T2-001").exists());
    assert!(!fx.installed("PKG-T1-002").exists());

    let expected: Vec<&str> = vec!["PKG-G0-001", "PKG-T0-001", "PKG-T1-001"];
    assert_eq!(report.installed.iter().map(String::as_str).collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn rerunning_the_plan_verifies_in_place() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();
    let orchestrator = Orchestrator::new(&session, &registry);
    orchestrator.install_plan().await.unwrap();
    let before = events(&fx.root(), streams::PACKAGE).len();

    let report = orchestrator.install_plan().await.unwrap();
    assert!(report.is_complete());
    assert!(report.tiers.iter().all(|t| t.attempted == 0));
    assert_eq!(report.tiers.iter().map(|t| t.already_installed).sum::<usize>(), 5);
    assert_eq!(events(&fx.root(), streams::PACKAGE).len(), before);
}

#[tokio::test]
async fn modified_installed_tree_is_detected_on_rerun() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();
    let orchestrator = Orchestrator::new(&session, &registry);
    orchestrator.install_plan().await.unwrap();

    std::fs::write(fx.installed("PKG-T1-001").join("lib/a"), b"edited").unwrap();
    let report = orchestrator.install_plan().await.unwrap();
    assert_eq!(report.failed["PKG-T1-001"], "INSTALLED_TREE_MODIFIED");
    assert!(!report.installed.contains("PKG-T1-001"));
}

#[tokio::test]
async fn cancelled_plan_installs_nothing() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();
    session.cancellation().cancel();

    let report = Orchestrator::new(&session, &registry).install_plan().await.unwrap();
    assert!(report.cancelled);
    assert!(report.installed.is_empty());
    assert_eq!(report.failed.len(), 5);
    assert!(report.failed.values().all(|code| code == "CANCELLED"));
    assert!(!fx.root().join("installed").exists());
}

#[tokio::test]
async fn uninstall_removes_destination_and_receipt() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();
    assert!(session.enforcer().is_bound(&Actor::package("PKG-T2-001")));

    uninstall(&session, "PKG-T2-001", None).await.unwrap();
    assert!(!fx.installed("PKG-T2-001").exists());
    assert!(!session.receipts().exists("PKG-T2-001"));
    assert_eq!(session.states().get("PKG-T2-001"), PackageState::Uninstalled);
    assert!(!session.enforcer().is_bound(&Actor::package("PKG-T2-001")));
    assert_eq!(events(&fx.root(), streams::PACKAGE).last().unwrap(), "UNINSTALL");

    let err = uninstall(&session, "PKG-T2-001", None).await.unwrap_err();
    assert_eq!(err.code(), "NOT_INSTALLED");

    // An uninstalled package may be installed again.
    Orchestrator::new(&session, &registry)
        .install("PKG-T2-001", None, None)
        .await
        .unwrap();
    assert!(fx.installed("PKG-T2-001").join("app").exists());
}

#[tokio::test]
async fn uninstall_checks_the_destination_base() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    let session = fx.session();
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();

    let err = uninstall(&session, "PKG-T2-001", Some("other")).await.unwrap_err();
    assert_eq!(err.code(), "NOT_INSTALLED");
    assert!(fx.installed("PKG-T2-001").exists());
}

#[tokio::test]
async fn reopened_session_sees_installed_receipts() {
    let fx = Fixture::new();
    let registry = layered(&fx);
    {
        let session = fx.session();
        Orchestrator::new(&session, &registry).install_plan().await.unwrap();
        session.close().unwrap();
    }

    let session = fx.session();
    assert_eq!(session.states().installed().len(), 5);
    let err = Orchestrator::new(&session, &registry)
        .install("PKG-T0-001", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DESTINATION_EXISTS");
}
