use std::path::{Path, PathBuf};

use crate::error::CapabilityError;
use crate::path::{is_within, normalize};

/// Exact confirmation text that unlocks destructive mode.
pub const DESTRUCTIVE_CONFIRMATION: &str = "YES_WIPE_PRISTINE";

/// Path prefixes that nobody may write or execute without destructive-mode
/// authority.
#[derive(Clone, Debug, Default)]
pub struct PristineSet {
    prefixes: Vec<PathBuf>,
}

impl PristineSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Prefixes are normalized against `root`.
    pub fn new<I, P>(root: &Path, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| normalize(root, p.as_ref()))
                .collect(),
        }
    }

    /// `path` must already be normalized.
    pub fn contains(&self, path: &Path) -> bool {
        self.prefixes.iter().any(|prefix| is_within(path, prefix))
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }
}

/// Proof that an operator confirmed a destructive operation.
///
/// Only obtainable from the exact confirmation literal.
#[derive(Debug)]
pub struct DestructiveToken {
    _private: (),
}

impl DestructiveToken {
    pub fn from_confirmation(value: &str) -> Result<Self, CapabilityError> {
        if value == DESTRUCTIVE_CONFIRMATION {
            Ok(Self { _private: () })
        } else {
            Err(CapabilityError::InvalidConfirmation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_must_be_exact() {
        assert!(DestructiveToken::from_confirmation("YES_WIPE_PRISTINE").is_ok());
        for bad in ["", "yes_wipe_pristine", "YES_WIPE_PRISTINE ", "YES"] {
            assert!(matches!(
                DestructiveToken::from_confirmation(bad),
                Err(CapabilityError::InvalidConfirmation)
            ));
        }
    }

    #[test]
    fn relative_prefixes_anchor_at_root() {
        let set = PristineSet::new(Path::new("/srv"), ["core", "/etc/strata"]);
        assert!(set.contains(Path::new("/srv/core/lib.so")));
        assert!(set.contains(Path::new("/etc/strata")));
        assert!(!set.contains(Path::new("/srv/corelib")));
    }
}
