//! Rule providers for custodian operations
//!
//! This module provides:
//! - The rule provider contract (`RulesService`)
//! - Verdict, metadata and per-operation data types
//! - The providers shipped with slashguard and their configuration

pub mod allowlist;
pub mod approving;
pub mod denying;
pub mod slashing;
pub mod time_window;
pub mod types;

pub use allowlist::{AllowlistConfig, AllowlistRules};
pub use approving::ApprovingRules;
pub use denying::DenyingRules;
pub use slashing::SlashingProtectionRules;
pub use time_window::{TimeWindowRule, TimeWindowRules};
pub use types::{
    new_passphrase, AccessAccountData, Checkpoint, CreateAccountData, LockAccountData,
    LockWalletData, OperationData, OperationKind, Passphrase, ReqMetadata, Root, RuleResult,
    SignBeaconAttestationData, SignBeaconProposalData, SignData, UnlockAccountData,
    UnlockWalletData,
};

use crate::errors::Result;
use crate::protection::{ProtectionMap, SlashingProtectionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pluggable policy unit.
///
/// Providers are shared across concurrent requests and are called
/// synchronously, so every method must return promptly. An `Err` is a fault
/// in the provider, never a denial.
pub trait RulesService: Send + Sync {
    /// Name of the provider, used in logs
    fn name(&self) -> &str;

    /// True for providers that gate signing on slashing protection records
    fn guards_slashing(&self) -> bool {
        false
    }

    fn on_create_account(&self, meta: &ReqMetadata, data: &CreateAccountData)
        -> Result<RuleResult>;

    fn on_list_accounts(&self, meta: &ReqMetadata, data: &AccessAccountData)
        -> Result<RuleResult>;

    fn on_lock_account(&self, meta: &ReqMetadata, data: &LockAccountData) -> Result<RuleResult>;

    fn on_lock_wallet(&self, meta: &ReqMetadata, data: &LockWalletData) -> Result<RuleResult>;

    fn on_unlock_account(&self, meta: &ReqMetadata, data: &UnlockAccountData)
        -> Result<RuleResult>;

    fn on_unlock_wallet(&self, meta: &ReqMetadata, data: &UnlockWalletData)
        -> Result<RuleResult>;

    fn on_sign(&self, meta: &ReqMetadata, data: &SignData) -> Result<RuleResult>;

    fn on_sign_beacon_attestation(
        &self,
        meta: &ReqMetadata,
        data: &SignBeaconAttestationData,
    ) -> Result<RuleResult>;

    /// Decide a batch of attestations in one pass. Must return one result per
    /// item, in input order.
    fn on_sign_beacon_attestations(
        &self,
        metas: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<RuleResult>> {
        metas
            .iter()
            .zip(data)
            .map(|(meta, item)| self.on_sign_beacon_attestation(meta, item))
            .collect()
    }

    fn on_sign_beacon_proposal(
        &self,
        meta: &ReqMetadata,
        data: &SignBeaconProposalData,
    ) -> Result<RuleResult>;

    /// Slashing protection data held by this provider
    fn export_slashing_protection(&self) -> Result<ProtectionMap> {
        Ok(ProtectionMap::new())
    }

    /// Take in slashing protection data. All or nothing.
    fn import_slashing_protection(&self, _records: &ProtectionMap) -> Result<()> {
        Ok(())
    }
}

/// Configuration for one entry of the ordered provider list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    /// Deny every request
    Denying,

    /// Approve every request
    Approving,

    /// Deny outside a daily UTC window
    TimeWindow(TimeWindowRule),

    /// Deny keys and accounts not on a list
    Allowlist(AllowlistConfig),

    /// Refuse slashable signatures
    SlashingProtection,
}

impl RuleConfig {
    /// Get a human-readable description of the provider
    pub fn description(&self) -> String {
        match self {
            RuleConfig::Denying => "Deny all requests".to_string(),
            RuleConfig::Approving => "Approve all requests".to_string(),
            RuleConfig::TimeWindow(r) => format!(
                "Allow only {}:{:02} - {}:{:02} UTC",
                r.start_hour, r.start_minute, r.end_hour, r.end_minute
            ),
            RuleConfig::Allowlist(r) => format!(
                "Allow only {} keys and {} account patterns",
                r.pubkeys.len(),
                r.accounts.len()
            ),
            RuleConfig::SlashingProtection => "Refuse slashable signatures".to_string(),
        }
    }
}

/// Build the ordered provider list from configuration
pub fn build_providers(
    configs: &[RuleConfig],
    store: Arc<dyn SlashingProtectionStore>,
) -> Result<Vec<Arc<dyn RulesService>>> {
    configs
        .iter()
        .map(|config| -> Result<Arc<dyn RulesService>> {
            Ok(match config {
                RuleConfig::Denying => Arc::new(DenyingRules::new()),
                RuleConfig::Approving => Arc::new(ApprovingRules::new()),
                RuleConfig::TimeWindow(window) => {
                    window.validate()?;
                    Arc::new(TimeWindowRules::new(window.clone()))
                }
                RuleConfig::Allowlist(list) => Arc::new(AllowlistRules::from_config(list)?),
                RuleConfig::SlashingProtection => {
                    Arc::new(SlashingProtectionRules::new(store.clone()))
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::ProtectionStore;

    #[test]
    fn test_rule_config_serde() {
        let json = r#"[
            {"type": "slashing_protection"},
            {"type": "time_window", "id": "office", "start_hour": 8, "start_minute": 0,
             "end_hour": 18, "end_minute": 30},
            {"type": "denying"}
        ]"#;
        let configs: Vec<RuleConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(configs.len(), 3);
        assert!(matches!(configs[0], RuleConfig::SlashingProtection));
        assert!(configs[1].description().contains("18:30"));
    }

    #[test]
    fn test_build_providers_keeps_order() {
        let store = Arc::new(ProtectionStore::in_memory());
        let providers = build_providers(
            &[
                RuleConfig::Approving,
                RuleConfig::SlashingProtection,
                RuleConfig::Denying,
            ],
            store,
        )
        .unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["approving", "slashing_protection", "denying"]);
    }

    #[test]
    fn test_build_providers_rejects_bad_window() {
        let store = Arc::new(ProtectionStore::in_memory());
        let window = TimeWindowRule::new("bad", 25, 0, 3, 0);
        assert!(build_providers(&[RuleConfig::TimeWindow(window)], store).is_err());
    }
}
