//! Rules that deny every request
//!
//! The minimal conforming provider, and the fail-safe default.

use crate::errors::Result;
use crate::protection::ProtectionMap;
use crate::rules::types::*;
use crate::rules::RulesService;

#[derive(Debug, Default)]
pub struct DenyingRules;

impl DenyingRules {
    pub fn new() -> Self {
        Self
    }
}

impl RulesService for DenyingRules {
    fn name(&self) -> &str {
        "denying"
    }

    fn on_create_account(&self, _: &ReqMetadata, _: &CreateAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_list_accounts(&self, _: &ReqMetadata, _: &AccessAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_lock_account(&self, _: &ReqMetadata, _: &LockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_lock_wallet(&self, _: &ReqMetadata, _: &LockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_unlock_account(&self, _: &ReqMetadata, _: &UnlockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_unlock_wallet(&self, _: &ReqMetadata, _: &UnlockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_sign(&self, _: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_sign_beacon_attestation(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn on_sign_beacon_attestations(
        &self,
        _: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<RuleResult>> {
        Ok(vec![RuleResult::Denied; data.len()])
    }

    fn on_sign_beacon_proposal(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        Ok(RuleResult::Denied)
    }

    fn export_slashing_protection(&self) -> Result<ProtectionMap> {
        Ok(ProtectionMap::new())
    }

    fn import_slashing_protection(&self, _: &ProtectionMap) -> Result<()> {
        Ok(())
    }
}
