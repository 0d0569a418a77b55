//! Allowlist rules
//!
//! Deny signing with keys that are not listed, and account management on
//! accounts that match none of the listed patterns. Abstain otherwise.

use crate::errors::{Result, SlashGuardError};
use crate::protection::PubKey;
use crate::rules::types::*;
use crate::rules::RulesService;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// Rule ID
    pub id: String,
    /// Keys allowed to sign. Empty = any key
    #[serde(default)]
    pub pubkeys: Vec<PubKey>,
    /// Regular expressions over `wallet/account` names. Empty = any account
    #[serde(default)]
    pub accounts: Vec<String>,
}

pub struct AllowlistRules {
    id: String,
    pubkeys: HashSet<PubKey>,
    accounts: Vec<Regex>,
}

impl AllowlistRules {
    pub fn from_config(config: &AllowlistConfig) -> Result<Self> {
        let accounts = config
            .accounts
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    SlashGuardError::ConfigError(format!(
                        "allowlist {}: invalid account pattern {}: {}",
                        config.id, pattern, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: config.id.clone(),
            pubkeys: config.pubkeys.iter().copied().collect(),
            accounts,
        })
    }

    /// Check if a key may sign
    pub fn is_key_allowed(&self, pubkey: Option<&PubKey>) -> bool {
        if self.pubkeys.is_empty() {
            return true;
        }
        pubkey.is_some_and(|key| self.pubkeys.contains(key))
    }

    /// Check if an account (or wallet) name may be managed
    pub fn is_account_allowed(&self, name: &str) -> bool {
        self.accounts.is_empty() || self.accounts.iter().any(|re| re.is_match(name))
    }

    fn sign_verdict(&self, meta: &ReqMetadata) -> Result<RuleResult> {
        if self.is_key_allowed(meta.pubkey.as_ref()) {
            return Ok(RuleResult::Unknown);
        }
        debug!(
            "Key {:?} not in allowlist (rule: {}, request: {})",
            meta.pubkey, self.id, meta.request_id
        );
        Ok(RuleResult::Denied)
    }

    fn account_verdict(&self, name: &str, meta: &ReqMetadata) -> Result<RuleResult> {
        if self.is_account_allowed(name) {
            return Ok(RuleResult::Unknown);
        }
        debug!(
            "Account {} not in allowlist (rule: {}, request: {})",
            name, self.id, meta.request_id
        );
        Ok(RuleResult::Denied)
    }
}

fn full_name(wallet: &str, account: &str) -> String {
    format!("{}/{}", wallet, account)
}

impl RulesService for AllowlistRules {
    fn name(&self) -> &str {
        "allowlist"
    }

    fn on_create_account(&self, meta: &ReqMetadata, data: &CreateAccountData) -> Result<RuleResult> {
        self.account_verdict(&full_name(&data.wallet, &data.account), meta)
    }

    fn on_list_accounts(&self, meta: &ReqMetadata, data: &AccessAccountData) -> Result<RuleResult> {
        self.account_verdict(&full_name(&data.wallet, &data.account), meta)
    }

    fn on_lock_account(&self, meta: &ReqMetadata, data: &LockAccountData) -> Result<RuleResult> {
        self.account_verdict(&full_name(&data.wallet, &data.account), meta)
    }

    fn on_lock_wallet(&self, meta: &ReqMetadata, data: &LockWalletData) -> Result<RuleResult> {
        self.account_verdict(&data.wallet, meta)
    }

    fn on_unlock_account(&self, meta: &ReqMetadata, data: &UnlockAccountData) -> Result<RuleResult> {
        self.account_verdict(&full_name(&data.wallet, &data.account), meta)
    }

    fn on_unlock_wallet(&self, meta: &ReqMetadata, data: &UnlockWalletData) -> Result<RuleResult> {
        self.account_verdict(&data.wallet, meta)
    }

    fn on_sign(&self, meta: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        self.sign_verdict(meta)
    }

    fn on_sign_beacon_attestation(
        &self,
        meta: &ReqMetadata,
        _: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        self.sign_verdict(meta)
    }

    fn on_sign_beacon_proposal(
        &self,
        meta: &ReqMetadata,
        _: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        self.sign_verdict(meta)
    }
}
