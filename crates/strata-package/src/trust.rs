//! Signature and attestation verification.
//!
//! Both are traits so deployments can plug in their own schemes. The shipped
//! defaults are Ed25519 detached signatures over
//! [`Package::signing_message`] and a subject-hash check for attestations.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::PackageError;
use crate::package::{Attestation, Package};

pub trait SignatureVerifier: Send + Sync {
    /// Whether any trusted key is configured. Without one, a present
    /// signature cannot be checked and counts as missing.
    fn is_configured(&self) -> bool;

    fn verify(&self, package: &Package, signature: &[u8]) -> Result<(), PackageError>;
}

pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, package: &Package, attestation: &Attestation) -> Result<(), PackageError>;
}

/// Accepts a signature made by any of the trusted keys.
#[derive(Clone, Debug, Default)]
pub struct Ed25519Verifier {
    keys: Vec<VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn new(keys: Vec<VerifyingKey>) -> Self {
        Self { keys }
    }

    /// Parse 64-character hex public keys.
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, PackageError> {
        let keys = keys
            .iter()
            .map(|k| {
                let bytes = hex::decode(k.as_ref())
                    .map_err(|e| PackageError::InvalidKey(e.to_string()))?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| PackageError::InvalidKey("expected 32 bytes".into()))?;
                VerifyingKey::from_bytes(&bytes).map_err(|e| PackageError::InvalidKey(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn is_configured(&self) -> bool {
        !self.keys.is_empty()
    }

    fn verify(&self, package: &Package, signature: &[u8]) -> Result<(), PackageError> {
        let invalid = |reason: String| PackageError::SignatureInvalid {
            package_id: package.package_id.clone(),
            reason,
        };
        let signature =
            Signature::from_slice(signature).map_err(|e| invalid(e.to_string()))?;
        let message = package.signing_message()?;
        if self
            .keys
            .iter()
            .any(|key| key.verify(&message, &signature).is_ok())
        {
            Ok(())
        } else {
            Err(invalid("no trusted key accepts the signature".into()))
        }
    }
}

/// Sign `package` with `key`. Used by packaging tools and tests.
pub fn sign_package(key: &SigningKey, package: &Package) -> Result<Vec<u8>, PackageError> {
    Ok(key.sign(&package.signing_message()?).to_bytes().to_vec())
}

/// Accepts attestations whose subject is the declared archive hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubjectHashVerifier;

impl AttestationVerifier for SubjectHashVerifier {
    fn verify(&self, package: &Package, attestation: &Attestation) -> Result<(), PackageError> {
        let invalid = |reason: String| PackageError::AttestationInvalid {
            package_id: package.package_id.clone(),
            reason,
        };
        if attestation.builder.trim().is_empty() {
            return Err(invalid("attestation names no builder".into()));
        }
        if attestation.subject_hash != package.archive_hash {
            return Err(invalid(format!(
                "subject {} does not match archive {}",
                attestation.subject_hash, package.archive_hash
            )));
        }
        Ok(())
    }
}
