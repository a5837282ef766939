mod common;

use common::{events, payloads, Fixture};
use strata_capability::{DestructiveToken, DESTRUCTIVE_CONFIRMATION};
use strata_install::{Drill, DrillExport, DrillMode, Orchestrator, PackageState};
use strata_ledger::streams;
use strata_package::{SeedRegistry, Tier};

fn fixed_set(fx: &Fixture) -> SeedRegistry {
    fx.registry(vec![
        fx.seed("PKG-G0-001", Tier::G0, &[], &[("boot", b"g0")]),
        fx.seed("PKG-T0-001", Tier::T0, &["PKG-G0-001"], &[("core/bin", b"t0")]),
        fx.seed("PKG-T1-001", Tier::T1, &["PKG-T0-001"], &[("lib/one", b"t1-1")]),
        fx.seed("PKG-T1-002", Tier::T1, &["PKG-T0-001"], &[("lib/two", b"t1-2")]),
    ])
}

fn token() -> DestructiveToken {
    DestructiveToken::from_confirmation(DESTRUCTIVE_CONFIRMATION).unwrap()
}

#[tokio::test]
async fn drill_round_trip_has_no_mismatches() {
    let fx = Fixture::new();
    let registry = fixed_set(&fx);
    let session = fx.session_with(DrillMode::Strict.policy(Default::default()));
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();

    let report = Drill::new(&session, &registry).run(&token()).await.unwrap();
    assert!(report.passed());
    assert!(report.mismatches.is_empty());
    assert_eq!(report.pre_installed, report.post_installed);
    assert_eq!(report.post_installed.len(), 4);
    assert!(report.chains.values().all(|c| c.valid));

    // The export is retained as evidence.
    let export = DrillExport::load(&report.export_dir).unwrap();
    assert_eq!(export.archives.len(), 4);
    assert!(export.dir.join("ledger/package.jsonl").exists());
    assert!(export.dir.join("receipts/PKG-T1-001.json").exists());
    assert!(export.archives_dir().join("PKG-T1-002.tar.gz").exists());

    let governance = events(&fx.root(), streams::GOVERNANCE);
    assert_eq!(governance.first().unwrap(), "DRILL_EXPORT");
    assert_eq!(governance.last().unwrap(), "DRILL_COMPLETE");
    assert!(governance.iter().any(|e| e == "DRILL_WIPE"));
}

#[tokio::test]
async fn corrupted_archive_shows_up_as_exactly_one_mismatch() {
    let fx = Fixture::new();
    let registry = fixed_set(&fx);
    let session = fx.session();
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();

    let drill = Drill::new(&session, &registry);
    let export = drill.export().await.unwrap();
    let removed = drill.wipe(&export, &token()).await.unwrap();
    assert_eq!(removed, 3);

    let archive = export.archives_dir().join("PKG-T1-002.tar.gz");
    let mut bytes = std::fs::read(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&archive, bytes).unwrap();

    let plan = drill.reinstall(&export).await.unwrap();
    let report = drill.compare(&export, removed, plan).await.unwrap();
    assert_eq!(report.mismatches, vec!["PKG-T1-002".to_string()]);
    assert!(!report.passed());
    assert_eq!(report.plan.failed["PKG-T1-002"], "HASH_MISMATCH");

    let complete = payloads(&fx.root(), streams::GOVERNANCE)
        .into_iter()
        .rev()
        .find(|(e, _)| e == "DRILL_COMPLETE")
        .unwrap();
    assert_eq!(complete.1["mismatches"][0], "PKG-T1-002");
}

#[tokio::test]
async fn wipe_preserves_genesis_and_removes_everything_else() {
    let fx = Fixture::new();
    let registry = fixed_set(&fx);
    let session = fx.session();
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();
    std::fs::create_dir_all(fx.installed("stray")).unwrap();
    std::fs::write(fx.installed("stray").join("leftover"), b"x").unwrap();

    let drill = Drill::new(&session, &registry);
    let export = drill.export().await.unwrap();
    let removed = drill.wipe(&export, &token()).await.unwrap();

    // Three packages and the stray directory, each counted once.
    assert_eq!(removed, 4);
    assert!(fx.installed("PKG-G0-001").join("boot").exists());
    assert!(session.receipts().exists("PKG-G0-001"));
    for id in ["PKG-T0-001", "PKG-T1-001", "PKG-T1-002", "stray"] {
        assert!(!fx.installed(id).exists(), "{id} survived the wipe");
    }
    assert!(!session.receipts().exists("PKG-T0-001"));
    assert_eq!(session.states().get("PKG-T0-001"), PackageState::Uninstalled);

    // Ledger and export survive.
    assert!(session.ledger().verify_all().unwrap().values().all(|c| c.valid));
    assert!(export.registry_path().exists());
    assert_eq!(export.pre_installed.len(), 4);
}

#[tokio::test]
async fn export_is_recorded_with_the_installed_set_as_artifacts() {
    let fx = Fixture::new();
    let registry = fixed_set(&fx);
    let session = fx.session();
    Orchestrator::new(&session, &registry).install_plan().await.unwrap();

    let export = Drill::new(&session, &registry).export().await.unwrap();
    let refs = session.ledger().index_lookup("PKG-T1-001");
    assert!(refs.iter().any(|r| r.stream == streams::GOVERNANCE));
    assert!(export.dir.starts_with(fx.root().join("drills")));
    assert!(export.drill_id.starts_with("drill-"));
}
