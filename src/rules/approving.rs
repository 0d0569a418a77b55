//! Rules that approve every request

use crate::errors::Result;
use crate::rules::types::*;
use crate::rules::RulesService;

#[derive(Debug, Default)]
pub struct ApprovingRules;

impl ApprovingRules {
    pub fn new() -> Self {
        Self
    }
}

impl RulesService for ApprovingRules {
    fn name(&self) -> &str {
        "approving"
    }

    fn on_create_account(&self, _: &ReqMetadata, _: &CreateAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_list_accounts(&self, _: &ReqMetadata, _: &AccessAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_lock_account(&self, _: &ReqMetadata, _: &LockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_lock_wallet(&self, _: &ReqMetadata, _: &LockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_unlock_account(&self, _: &ReqMetadata, _: &UnlockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_unlock_wallet(&self, _: &ReqMetadata, _: &UnlockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_sign(&self, _: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_sign_beacon_attestation(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }

    fn on_sign_beacon_proposal(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        Ok(RuleResult::Approved)
    }
}
