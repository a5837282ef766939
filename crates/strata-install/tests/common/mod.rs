#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use strata_install::{InstallPolicy, Session, StrataConfig};
use strata_ledger::Digest;
use strata_package::{
    archive_file_name, pack_files, Attestation, PackageManifest, SeedPackage, SeedRegistry, Tier,
};
use tempfile::TempDir;

/// A governed root in a temp dir with a package store under it.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("store")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn store(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    pub fn config(&self) -> StrataConfig {
        StrataConfig::with_root(self.root())
    }

    /// A session with install mode on and default strict trust policy.
    pub fn session(&self) -> Session {
        self.session_with(install_mode())
    }

    pub fn session_with(&self, policy: InstallPolicy) -> Session {
        Session::open(self.config()).unwrap().with_policy(policy)
    }

    /// Pack `files` into the store and declare the package, attested.
    pub fn seed(&self, id: &str, tier: Tier, deps: &[&str], files: &[(&str, &[u8])]) -> SeedPackage {
        let archive = archive_file_name(id);
        let hash = pack_files(&self.store().join(&archive), files).unwrap();
        SeedPackage {
            package_id: id.to_string(),
            version: semver::Version::new(1, 0, 0),
            tier,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            manifest: PackageManifest::default(),
            archive: PathBuf::from(archive),
            archive_hash: hash,
            signature: None,
            attestation: Some(attestation(hash)),
        }
    }

    /// Save `seeds` as the store's registry, in the given order, and load it back.
    pub fn registry(&self, seeds: Vec<SeedPackage>) -> SeedRegistry {
        let order = seeds.iter().map(|s| s.package_id.clone()).collect();
        let path = self.store().join("seed_registry.json");
        SeedRegistry::new(seeds, order).save(&path).unwrap();
        SeedRegistry::load(&path).unwrap()
    }

    pub fn installed(&self, id: &str) -> PathBuf {
        self.root().join("installed").join(id)
    }
}

pub fn attestation(subject_hash: Digest) -> Attestation {
    Attestation {
        subject_hash,
        builder: "ci.strata.test".into(),
        issued_at: Utc::now(),
    }
}

pub fn install_mode() -> InstallPolicy {
    InstallPolicy {
        install_mode: true,
        ..InstallPolicy::default()
    }
}

/// Payloads of every record on `stream`, in order.
pub fn payloads(root: &Path, stream: &str) -> Vec<(String, Value)> {
    let path = root.join("ledger").join(format!("{stream}.jsonl"));
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .map(|line| {
            let record: Value = serde_json::from_str(line).unwrap();
            (
                record["event_type"].as_str().unwrap().to_string(),
                record["payload"].clone(),
            )
        })
        .collect()
}

pub fn events(root: &Path, stream: &str) -> Vec<String> {
    payloads(root, stream).into_iter().map(|(e, _)| e).collect()
}

/// Every file under `dir`, relative path to contents, sorted.
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().display().to_string();
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}
