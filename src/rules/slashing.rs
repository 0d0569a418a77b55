//! Slashing protection rules
//!
//! Gates beacon attestation and proposal signing on the protection store.
//! An approved request leaves a reservation behind in the store; the caller
//! must commit or roll it back.

use crate::errors::Result;
use crate::protection::{
    ProtectionMap, PubKey, Reservation, SlashingProtection, SlashingProtectionStore,
};
use crate::rules::types::*;
use crate::rules::RulesService;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SlashingProtectionRules {
    store: Arc<dyn SlashingProtectionStore>,
}

impl SlashingProtectionRules {
    pub fn new(store: Arc<dyn SlashingProtectionStore>) -> Self {
        Self { store }
    }

    fn gate(&self, meta: &ReqMetadata, candidate: &SlashingProtection) -> Result<RuleResult> {
        let Some(key) = meta.pubkey else {
            warn!(
                "Request {} for {} has no public key; refusing to sign",
                meta.request_id, meta.account
            );
            return Ok(RuleResult::Denied);
        };

        match self.store.reserve(&key, candidate)? {
            Reservation::Reserved => {
                debug!("Reserved {:?} for {} (request {})", candidate, key, meta.request_id);
                Ok(RuleResult::Approved)
            }
            Reservation::Conflict(conflict) => {
                warn!(
                    "Refusing slashable request {} for {}: {}",
                    meta.request_id, key, conflict
                );
                Ok(RuleResult::Denied)
            }
        }
    }
}

impl RulesService for SlashingProtectionRules {
    fn name(&self) -> &str {
        "slashing_protection"
    }

    fn guards_slashing(&self) -> bool {
        true
    }

    fn on_create_account(&self, _: &ReqMetadata, _: &CreateAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_list_accounts(&self, _: &ReqMetadata, _: &AccessAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_lock_account(&self, _: &ReqMetadata, _: &LockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_lock_wallet(&self, _: &ReqMetadata, _: &LockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_unlock_account(&self, _: &ReqMetadata, _: &UnlockAccountData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_unlock_wallet(&self, _: &ReqMetadata, _: &UnlockWalletData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_sign(&self, _: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        Ok(RuleResult::Unknown)
    }

    fn on_sign_beacon_attestation(
        &self,
        meta: &ReqMetadata,
        data: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        self.gate(
            meta,
            &SlashingProtection::attestation(data.source.epoch, data.target.epoch),
        )
    }

    fn on_sign_beacon_attestations(
        &self,
        metas: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<RuleResult>> {
        let mut occurrences: HashMap<PubKey, usize> = HashMap::new();
        for key in metas.iter().filter_map(|m| m.pubkey) {
            *occurrences.entry(key).or_default() += 1;
        }

        metas
            .iter()
            .zip(data)
            .map(|(meta, item)| {
                let repeated = meta
                    .pubkey
                    .is_some_and(|key| occurrences.get(&key).copied().unwrap_or(0) > 1);
                if repeated {
                    warn!(
                        "Refusing request {}: multiple attestations for one key in a batch",
                        meta.request_id
                    );
                    return Ok(RuleResult::Denied);
                }
                self.on_sign_beacon_attestation(meta, item)
            })
            .collect()
    }

    fn on_sign_beacon_proposal(
        &self,
        meta: &ReqMetadata,
        data: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        self.gate(meta, &SlashingProtection::proposal(data.slot))
    }

    fn export_slashing_protection(&self) -> Result<ProtectionMap> {
        self.store.export_all()
    }

    fn import_slashing_protection(&self, records: &ProtectionMap) -> Result<()> {
        self.store.import_all(records)
    }
}
