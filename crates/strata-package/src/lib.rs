//! Strata Package: what gets installed.
//!
//! - [`Package`] and its [`PackageManifest`] of declared reads and writes
//! - the [`SeedRegistry`] that lists packages and their install order
//! - archive hashing and validated tar.gz reading ([`archive`])
//! - pluggable signature and attestation verification ([`trust`])

#![deny(unsafe_code)]

pub mod archive;
pub mod error;
pub mod manifest;
pub mod package;
pub mod registry;
pub mod tier;
pub mod trust;

pub use archive::{hash_file, pack_files, read_archive, verify_archive, ArchiveContents, ArchiveFile};
pub use error::PackageError;
pub use manifest::PackageManifest;
pub use package::{Attestation, Package};
pub use registry::{archive_file_name, SeedPackage, SeedRegistry, SEED_SCHEMA_VERSION};
pub use tier::Tier;
pub use trust::{
    sign_package, AttestationVerifier, Ed25519Verifier, SignatureVerifier, SubjectHashVerifier,
};
