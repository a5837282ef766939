use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_ledger::{Digest, EntryRef};
use strata_package::Tier;
use tracing::warn;

use crate::error::InstallError;

/// Proof that a package is installed. Exists exactly while it is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledReceipt {
    pub receipt_id: String,
    pub package_id: String,
    pub version: semver::Version,
    pub tier: Tier,
    pub archive_hash: Digest,
    pub destination_path: PathBuf,
    /// SHA-256 of every installed file, keyed by path relative to the destination.
    pub file_hashes: BTreeMap<String, Digest>,
    pub installed_at: DateTime<Utc>,
    /// The `INSTALL` entry on the package stream.
    pub ledger_ref: EntryRef,
}

impl InstalledReceipt {
    pub fn receipt_id_for(package_id: &str, archive_hash: &Digest) -> String {
        format!("RCPT-{package_id}-{}", &archive_hash.to_hex()[..12])
    }

    /// Files whose on-disk content no longer matches the receipt.
    pub fn drifted_files(&self) -> Vec<String> {
        self.file_hashes
            .iter()
            .filter(|(rel, expected)| {
                let path = self.destination_path.join(rel);
                let actual = File::open(&path)
                    .and_then(|f| Digest::sha256_reader(BufReader::new(f)));
                !matches!(actual, Ok(ref d) if d == *expected)
            })
            .map(|(rel, _)| rel.clone())
            .collect()
    }
}

/// `<dir>/<package_id>.json`, one per installed package.
#[derive(Clone, Debug)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, InstallError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| InstallError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, package_id: &str) -> PathBuf {
        self.dir.join(format!("{package_id}.json"))
    }

    pub fn exists(&self, package_id: &str) -> bool {
        self.path_for(package_id).exists()
    }

    pub fn load(&self, package_id: &str) -> Result<Option<InstalledReceipt>, InstallError> {
        let path = self.path_for(package_id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| InstallError::Config(format!("corrupt receipt {}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(InstallError::io(path, e)),
        }
    }

    /// Write a new receipt. Refuses to replace an existing one.
    pub fn save(&self, receipt: &InstalledReceipt) -> Result<(), InstallError> {
        let path = self.path_for(&receipt.package_id);
        if path.exists() {
            return Err(InstallError::DestinationExists {
                package_id: receipt.package_id.clone(),
                path,
            });
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(receipt)
            .map_err(|e| InstallError::Config(e.to_string()))?;
        std::fs::write(&tmp, json).map_err(|e| InstallError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| InstallError::io(&path, e))
    }

    /// Returns whether a receipt was removed.
    pub fn remove(&self, package_id: &str) -> Result<bool, InstallError> {
        let path = self.path_for(package_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(InstallError::io(path, e)),
        }
    }

    /// Every readable receipt, ordered by package id.
    pub fn list(&self) -> Result<Vec<InstalledReceipt>, InstallError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| InstallError::io(&self.dir, e))?;
        let mut receipts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| InstallError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(Some(receipt)) => receipts.push(receipt),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable receipt"),
            }
        }
        receipts.sort_by(|a, b| a.package_id.cmp(&b.package_id));
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(id: &str, dest: PathBuf) -> InstalledReceipt {
        InstalledReceipt {
            receipt_id: InstalledReceipt::receipt_id_for(id, &Digest::ZERO),
            package_id: id.into(),
            version: semver::Version::new(1, 0, 0),
            tier: Tier::T0,
            archive_hash: Digest::ZERO,
            destination_path: dest,
            file_hashes: BTreeMap::from([("a.txt".to_string(), Digest::sha256(b"a"))]),
            installed_at: Utc::now(),
            ledger_ref: EntryRef {
                stream: "package".into(),
                sequence_number: 0,
            },
        }
    }

    #[test]
    fn at_most_one_receipt_per_package() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::open(dir.path().join("receipts")).unwrap();
        let r = receipt("PKG-T0-001", dir.path().join("installed/PKG-T0-001"));
        store.save(&r).unwrap();
        assert_eq!(store.save(&r).unwrap_err().code(), "DESTINATION_EXISTS");
        assert_eq!(store.load("PKG-T0-001").unwrap(), Some(r));
        assert!(store.remove("PKG-T0-001").unwrap());
        assert!(!store.remove("PKG-T0-001").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn drift_is_detected_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("a.txt"), b"a").unwrap();
        let r = receipt("PKG-T0-001", dest.clone());
        assert!(r.drifted_files().is_empty());

        std::fs::write(dest.join("a.txt"), b"changed").unwrap();
        assert_eq!(r.drifted_files(), vec!["a.txt".to_string()]);
    }
}
