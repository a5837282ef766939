mod common;

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::{events, install_mode, payloads, Fixture};
use ed25519_dalek::SigningKey;
use strata_capability::Actor;
use strata_install::{
    GenesisInstaller, InstallError, InstallPolicy, Orchestrator, PackageState, Session,
    StandardInstaller,
};
use strata_ledger::streams;
use strata_package::{sign_package, Ed25519Verifier, SeedPackage, SeedRegistry, Tier};

fn genesis_seed(fx: &Fixture) -> SeedPackage {
    fx.seed("PKG-G0-001", Tier::G0, &[], &[("boot", b"genesis")])
}

async fn bootstrap(fx: &Fixture, session: &Session, registry: &SeedRegistry) {
    let package = registry.package("PKG-G0-001").unwrap();
    GenesisInstaller::new(session)
        .install(&package, &fx.installed("PKG-G0-001"))
        .await
        .unwrap();
}

async fn install(
    fx: &Fixture,
    session: &Session,
    registry: &SeedRegistry,
    id: &str,
) -> Result<(), InstallError> {
    let package = registry.package(id).unwrap();
    StandardInstaller::new(session, registry)
        .install(&package, &fx.installed(id))
        .await
        .map(|_| ())
}

#[tokio::test]
async fn standard_install_records_evidence_and_binds_the_manifest() {
    let fx = Fixture::new();
    let mut tool = fx.seed("PKG-T0-001", Tier::T0, &["PKG-G0-001"], &[("bin/tool", b"tool")]);
    tool.manifest.declared_writes = vec!["installed/PKG-T0-001/var/**".into()];
    let registry = fx.registry(vec![genesis_seed(&fx), tool]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    install(&fx, &session, &registry, "PKG-T0-001").await.unwrap();

    assert_eq!(session.states().get("PKG-T0-001"), PackageState::Installed);
    assert_eq!(std::fs::read(fx.installed("PKG-T0-001").join("bin/tool")).unwrap(), b"tool");
    let receipt = session.receipts().load("PKG-T0-001").unwrap().unwrap();
    assert!(receipt.file_hashes.contains_key("bin/tool"));

    let evidence = payloads(&fx.root(), streams::EVIDENCE);
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].0, "EVIDENCE");
    assert_eq!(evidence[0].1["package_id"], "PKG-T0-001");
    assert_eq!(evidence[0].1["declared_writes"][0], "installed/PKG-T0-001/var/**");

    let manifest = session.enforcer().manifest(&Actor::package("PKG-T0-001")).unwrap();
    assert_eq!(manifest.rules().len(), 1);

    let lineage = session.ledger().index_lookup("PKG-T0-001");
    assert!(lineage.iter().any(|r| r.stream == streams::PACKAGE));
    assert!(lineage.iter().any(|r| r.stream == streams::EVIDENCE));
}

#[tokio::test]
async fn missing_dependency_fails_without_touching_the_destination() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T1-001", Tier::T1, &["PKG-G0-001"], &[("lib", b"l")]),
        fx.seed("PKG-T2-001", Tier::T2, &["PKG-T1-001"], &[("app", b"a")]),
    ]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T2-001").await.unwrap_err();
    match &err {
        InstallError::DependencyUnsatisfied { missing, .. } => {
            assert_eq!(missing, &vec!["PKG-T1-001".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fx.installed("PKG-T2-001").exists());
    assert!(!session.receipts().exists("PKG-T2-001"));
    assert_eq!(
        events(&fx.root(), streams::PACKAGE),
        vec!["INSTALL", "INSTALL_FAILED"]
    );
}

#[tokio::test]
async fn standard_install_requires_the_genesis_set() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let session = fx.session();

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "DEPENDENCY_UNSATISFIED");
}

#[tokio::test]
async fn standard_install_is_refused_outside_install_mode() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let session = fx.session_with(InstallPolicy::default());
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "INSTALL_MODE_DISABLED");
    assert!(!fx.installed("PKG-T0-001").exists());
}

#[tokio::test]
async fn destination_outside_the_granted_base_is_denied_and_logged() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    let err = Orchestrator::new(&session, &registry)
        .install("PKG-T0-001", None, Some("elsewhere"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CAPABILITY_DENIED");
    assert!(!err.is_integrity_failure());
    assert!(!fx.root().join("elsewhere/PKG-T0-001").exists());

    let denials = payloads(&fx.root(), streams::GOVERNANCE);
    assert_eq!(denials[0].0, "CAPABILITY_DENIED");
    assert_eq!(denials[0].1["reason"], "NO_MATCHING_RULE");
    assert_eq!(session.states().get("PKG-T0-001"), PackageState::NotPresent);
}

#[tokio::test]
async fn writing_into_a_pristine_path_is_an_integrity_failure() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    let package = registry.package("PKG-T0-001").unwrap();
    let err = StandardInstaller::new(&session, &registry)
        .install(&package, &fx.root().join("ledger/PKG-T0-001"))
        .await
        .unwrap_err();
    assert!(err.is_integrity_failure());
    assert!(!fx.root().join("ledger/PKG-T0-001").exists());
    assert_eq!(events(&fx.root(), streams::GOVERNANCE), vec!["CAPABILITY_DENIED"]);
}

#[tokio::test]
async fn strict_mode_refuses_unattested_packages() {
    let fx = Fixture::new();
    let mut bare = fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]);
    bare.attestation = None;
    let registry = fx.registry(vec![genesis_seed(&fx), bare]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "ATTESTATION_MISSING");
    assert!(events(&fx.root(), streams::GOVERNANCE).is_empty());
    assert!(!fx.installed("PKG-T0-001").exists());
}

#[tokio::test]
async fn dev_mode_waiver_is_recorded_and_the_install_proceeds() {
    let fx = Fixture::new();
    let mut bare = fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]);
    bare.attestation = None;
    let registry = fx.registry(vec![genesis_seed(&fx), bare]);
    let session = fx.session_with(InstallPolicy {
        strict: false,
        allow_unattested: true,
        ..install_mode()
    });
    bootstrap(&fx, &session, &registry).await;

    install(&fx, &session, &registry, "PKG-T0-001").await.unwrap();

    let governance = payloads(&fx.root(), streams::GOVERNANCE);
    assert_eq!(governance.len(), 1);
    assert_eq!(governance[0].0, "WAIVER");
    assert_eq!(governance[0].1["waiver"], "unattested");
    assert_eq!(governance[0].1["package_id"], "PKG-T0-001");
}

#[tokio::test]
async fn dev_mode_without_the_waiver_flag_still_refuses() {
    let fx = Fixture::new();
    let mut bare = fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]);
    bare.attestation = None;
    let registry = fx.registry(vec![genesis_seed(&fx), bare]);
    let session = fx.session_with(InstallPolicy {
        strict: false,
        ..install_mode()
    });
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "ATTESTATION_MISSING");
}

#[tokio::test]
async fn waiver_under_strict_mode_is_a_logged_conflict_and_strict_wins() {
    let fx = Fixture::new();
    let mut bare = fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]);
    bare.attestation = None;
    let registry = fx.registry(vec![genesis_seed(&fx), bare]);
    let session = fx.session_with(InstallPolicy {
        allow_unattested: true,
        ..install_mode()
    });
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "ATTESTATION_MISSING");
    assert_eq!(events(&fx.root(), streams::GOVERNANCE), vec!["WAIVER_CONFLICT"]);
    assert!(!fx.installed("PKG-T0-001").exists());
}

fn signed_registry(fx: &Fixture, sign_with: &SigningKey) -> SeedRegistry {
    let registry = fx.registry(vec![
        genesis_seed(fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let signature = sign_package(sign_with, &registry.package("PKG-T0-001").unwrap()).unwrap();
    let mut seeds = registry.packages.clone();
    seeds[1].signature = Some(BASE64.encode(signature));
    fx.registry(seeds)
}

fn trusting(fx: &Fixture, key: &SigningKey) -> Session {
    fx.session()
        .with_signature_verifier(Arc::new(Ed25519Verifier::new(vec![key.verifying_key()])))
}

#[tokio::test]
async fn signed_package_installs_under_a_trusted_key() {
    let fx = Fixture::new();
    let key = SigningKey::from_bytes(&[7u8; 32]);
    let registry = signed_registry(&fx, &key);
    let session = trusting(&fx, &key);
    bootstrap(&fx, &session, &registry).await;

    install(&fx, &session, &registry, "PKG-T0-001").await.unwrap();
    assert!(session.states().get("PKG-T0-001").is_installed());
}

#[tokio::test]
async fn signature_from_an_untrusted_key_is_rejected() {
    let fx = Fixture::new();
    let trusted = SigningKey::from_bytes(&[7u8; 32]);
    let rogue = SigningKey::from_bytes(&[9u8; 32]);
    let registry = signed_registry(&fx, &rogue);
    let session = trusting(&fx, &trusted);
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "SIGNATURE_INVALID");
    assert!(!fx.installed("PKG-T0-001").exists());
}

#[tokio::test]
async fn unsigned_package_is_refused_once_keys_are_trusted() {
    let fx = Fixture::new();
    let key = SigningKey::from_bytes(&[7u8; 32]);
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &[("a", b"a")]),
    ]);
    let session = trusting(&fx, &key);
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "SIGNATURE_MISSING");
}

#[tokio::test]
async fn standard_installer_refuses_genesis_packages() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![genesis_seed(&fx)]);
    let session = fx.session();

    let err = install(&fx, &session, &registry, "PKG-G0-001").await.unwrap_err();
    assert_eq!(err.code(), "TIER_MISMATCH");
}

#[tokio::test]
async fn higher_tier_waits_for_every_lower_tier_package() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &["PKG-G0-001"], &[("core", b"c")]),
        fx.seed("PKG-T0-002", Tier::T0, &["PKG-G0-001"], &[("extra", b"e")]),
        fx.seed("PKG-T1-001", Tier::T1, &["PKG-T0-001"], &[("lib", b"l")]),
    ]);
    let session = fx.session();
    let orchestrator = Orchestrator::new(&session, &registry);
    orchestrator.install("PKG-G0-001", None, None).await.unwrap();
    orchestrator.install("PKG-T0-001", None, None).await.unwrap();

    // Every declared dependency is installed, but PKG-T0-002 is not.
    let err = orchestrator
        .install("PKG-T1-001", None, None)
        .await
        .unwrap_err();
    match &err {
        InstallError::DependencyUnsatisfied { missing, .. } => {
            assert_eq!(missing, &vec!["PKG-T0-002".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fx.installed("PKG-T1-001").exists());
    assert_eq!(
        events(&fx.root(), streams::PACKAGE).last().unwrap(),
        "INSTALL_FAILED"
    );

    orchestrator.install("PKG-T0-002", None, None).await.unwrap();
    orchestrator.install("PKG-T1-001", None, None).await.unwrap();
    assert!(session.states().get("PKG-T1-001").is_installed());
}

#[tokio::test]
async fn denied_file_mid_extraction_rolls_back_the_whole_destination() {
    let fx = Fixture::new();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed(
            "PKG-T0-001",
            Tier::T0,
            &[],
            &[("bin/tool", &b"tool"[..]), ("etc/secret", &b"s"[..])],
        ),
    ]);
    let mut config = fx.config();
    config.pristine.push(PathBuf::from("installed/PKG-T0-001/etc"));
    let session = Session::open(config).unwrap().with_policy(install_mode());
    bootstrap(&fx, &session, &registry).await;

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    assert_eq!(err.code(), "CAPABILITY_DENIED");
    assert!(!fx.installed("PKG-T0-001").exists());
    assert!(!session.receipts().exists("PKG-T0-001"));
    assert_eq!(session.states().get("PKG-T0-001"), PackageState::Failed);

    let denials = payloads(&fx.root(), streams::GOVERNANCE);
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].1["reason"], "PRISTINE_VIOLATION");
    assert!(denials[0].1["path"].as_str().unwrap().ends_with("etc/secret"));
    assert_eq!(
        events(&fx.root(), streams::PACKAGE),
        vec!["INSTALL", "INSTALL_FAILED"]
    );
}

#[tokio::test]
async fn cancelling_between_files_rolls_back_what_was_written() {
    let fx = Fixture::new();
    let files: Vec<(String, Vec<u8>)> = (0..400u32)
        .map(|i| (format!("data/{i:04}"), vec![i as u8; 64]))
        .collect();
    let entries: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(path, data)| (path.as_str(), data.as_slice()))
        .collect();
    let registry = fx.registry(vec![
        genesis_seed(&fx),
        fx.seed("PKG-T0-001", Tier::T0, &[], &entries),
    ]);
    let session = fx.session();
    bootstrap(&fx, &session, &registry).await;

    // Cancel as soon as the first file is on disk.
    let cancel = session.cancellation().clone();
    let first = fx.installed("PKG-T0-001").join("data/0000");
    let watcher = tokio::spawn(async move {
        while !first.exists() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
    });

    let err = install(&fx, &session, &registry, "PKG-T0-001").await.unwrap_err();
    watcher.await.unwrap();
    assert_eq!(err.code(), "CANCELLED");
    assert!(!fx.installed("PKG-T0-001").exists());
    assert!(!session.receipts().exists("PKG-T0-001"));
    assert_eq!(session.states().get("PKG-T0-001"), PackageState::Failed);
    assert_eq!(
        events(&fx.root(), streams::PACKAGE),
        vec!["INSTALL", "INSTALL_FAILED"]
    );
}
