//! slashguard - Authorization and slashing protection for a remote validator-key custodian
//!
//! Sits between a transport and the keys it guards:
//! - Checks caller credentials before anything else runs
//! - Asks an ordered list of rule providers whether a request may proceed
//! - Refuses to sign conflicting beacon attestations and proposals
//! - Exports and imports slashing protection records
//!
//! # Safety
//!
//! - Every decision fails closed: abstention, provider errors and panics all deny
//! - Requests for one key are serialized; different keys proceed in parallel
//! - A protection record is committed only after a signature exists, and rolled
//!   back when signing fails or the request is dropped
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use slashguard::{Config, Fetcher, Processor};
//! # fn run(fetcher: Arc<dyn Fetcher>) -> slashguard::Result<()> {
//! let config = Config::load(Some("/etc/slashguard/config"))?;
//! slashguard::logging::init_logging(&config.logging)?;
//! let _processor = Processor::from_config(&config, fetcher)?;
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod process;
pub mod protection;
pub mod ruler;
pub mod rules;

#[cfg(test)]
mod testing;

pub use checker::{Action, Checker, Credentials, StaticChecker};
pub use config::Config;
pub use errors::{ErrorKind, Result, SlashGuardError};
pub use fetcher::{Account, AccountRef, Fetcher, Wallet};
pub use process::{Processor, ProcessorBuilder};
pub use protection::{ProtectionMap, ProtectionStore, PubKey, SlashingProtection};
pub use ruler::Ruler;
pub use rules::{RuleConfig, RuleResult, RulesService};
