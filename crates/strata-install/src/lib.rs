//! Strata Install: tiered installation on top of the ledger and the
//! capability enforcer.
//!
//! - [`Session`] wires the ledger, enforcer, receipt store and policy for one root
//! - [`GenesisInstaller`] bootstraps the G0 set with no prior dependencies
//! - [`StandardInstaller`] installs T0-T3 under capability, signature and
//!   attestation checks
//! - [`Orchestrator`] runs a seed registry tier by tier behind a tier barrier
//! - [`Drill`] proves the tree can be rebuilt from its own exports
//!
//! Every install either reaches `Installed` with a receipt and an `INSTALL`
//! ledger entry, or leaves no destination behind.

#![deny(unsafe_code)]

pub mod config;
pub mod drill;
pub mod error;
pub mod genesis;
pub mod orchestrator;
mod pipeline;
pub mod policy;
pub mod receipt;
pub mod session;
pub mod standard;
pub mod state;

pub use config::{StrataConfig, DEFAULT_CONFIG_FILE};
pub use drill::{Drill, DrillExport, DrillMode, DrillReport, ENV_DRILL_MODE, ENV_WIPE_CONFIRM};
pub use error::{DrillError, InstallError};
pub use genesis::GenesisInstaller;
pub use orchestrator::{uninstall, Orchestrator, PlanReport, TierScore};
pub use policy::{InstallPolicy, MissingResolution, WaiverKind};
pub use receipt::{InstalledReceipt, ReceiptStore};
pub use session::Session;
pub use standard::StandardInstaller;
pub use state::{PackageState, PackageTransition, StateTable};
