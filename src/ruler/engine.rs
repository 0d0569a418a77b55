//! Rule aggregation engine
//!
//! Runs the ordered provider list for a request and collapses the verdicts
//! into one decision.

use crate::errors::{Result, SlashGuardError};
use crate::protection::{merge_maps, ProtectionMap};
use crate::rules::{
    OperationData, OperationKind, ReqMetadata, RuleResult, RulesService,
    SignBeaconAttestationData,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one batch item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchVerdict {
    pub result: RuleResult,
    /// The first denial came from a slashing protection provider
    pub slashing_denial: bool,
}

/// Aggregates an ordered, fixed list of rule providers
pub struct Ruler {
    providers: Vec<Arc<dyn RulesService>>,
}

impl Ruler {
    pub fn new(providers: Vec<Arc<dyn RulesService>>) -> Self {
        if providers.is_empty() {
            info!("No rule providers configured; every request will be denied");
        }
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Decide a single request.
    ///
    /// Returns `Approved` or `Denied`. The first denial ends evaluation.
    /// A provider fault ends evaluation with `ProviderFault`, which callers
    /// must treat as a denial.
    pub fn evaluate(&self, meta: &ReqMetadata, data: OperationData<'_>) -> Result<RuleResult> {
        let kind = data.kind();
        let mut combined = RuleResult::Unknown;

        for provider in &self.providers {
            let result = invoke(provider.as_ref(), kind, || dispatch(provider.as_ref(), meta, data))?;
            if result == RuleResult::Denied {
                debug!(
                    "{} request {} denied by {}",
                    kind,
                    meta.request_id,
                    provider.name()
                );
                return Ok(RuleResult::Denied);
            }
            combined = combined.combine(result);
        }

        let decision = combined.resolve();
        debug!("{} request {} resolved to {}", kind, meta.request_id, decision);
        Ok(decision)
    }

    /// Decide a batch of attestations, one result per item in input order.
    ///
    /// Each provider sees the whole batch once. A provider that faults, or
    /// that returns the wrong number of results, fails the whole batch.
    pub fn evaluate_batch(
        &self,
        metas: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<RuleResult>> {
        Ok(self
            .evaluate_batch_verdicts(metas, data)?
            .into_iter()
            .map(|v| v.result)
            .collect())
    }

    /// As [`Ruler::evaluate_batch`], also noting which denials came from a
    /// slashing protection provider.
    pub fn evaluate_batch_verdicts(
        &self,
        metas: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<BatchVerdict>> {
        if metas.len() != data.len() {
            return Err(SlashGuardError::InvalidRequest(format!(
                "batch has {} metadata entries for {} attestations",
                metas.len(),
                data.len()
            )));
        }

        let kind = OperationKind::SignBeaconAttestations;
        let mut combined = vec![BatchVerdict::default(); data.len()];

        for provider in &self.providers {
            if combined.iter().all(|v| v.result == RuleResult::Denied) {
                break;
            }

            let results = invoke(provider.as_ref(), kind, || {
                provider.on_sign_beacon_attestations(metas, data)
            })?;
            if results.len() != data.len() {
                error!(
                    "Rule provider {} returned {} results for {} attestations",
                    provider.name(),
                    results.len(),
                    data.len()
                );
                return Err(SlashGuardError::ProviderFault(format!(
                    "{} returned {} results for {} attestations",
                    provider.name(),
                    results.len(),
                    data.len()
                )));
            }

            for (verdict, result) in combined.iter_mut().zip(results) {
                if result == RuleResult::Denied && verdict.result != RuleResult::Denied {
                    verdict.slashing_denial = provider.guards_slashing();
                }
                verdict.result = verdict.result.combine(result);
            }
        }

        Ok(combined
            .into_iter()
            .map(|v| BatchVerdict {
                result: v.result.resolve(),
                slashing_denial: v.slashing_denial,
            })
            .collect())
    }

    /// Slashing protection from every provider, merged by maximum
    pub fn export_slashing_protection(&self) -> Result<ProtectionMap> {
        let mut merged = ProtectionMap::new();
        for provider in &self.providers {
            let records = invoke_export(provider.as_ref(), || provider.export_slashing_protection())?;
            merge_maps(&mut merged, &records);
        }
        Ok(merged)
    }

    /// Hand slashing protection to every provider.
    ///
    /// The mapping is validated up front so a malformed import never reaches
    /// any provider.
    pub fn import_slashing_protection(&self, records: &ProtectionMap) -> Result<()> {
        for (key, record) in records {
            record
                .validate()
                .map_err(|e| SlashGuardError::ImportFault(format!("{}: {}", key, e)))?;
        }

        for provider in &self.providers {
            catch_unwind(AssertUnwindSafe(|| provider.import_slashing_protection(records)))
                .map_err(|_| {
                    SlashGuardError::ImportFault(format!("{} panicked during import", provider.name()))
                })?
                .map_err(|e| match e {
                    SlashGuardError::ImportFault(_) => e,
                    other => SlashGuardError::ImportFault(format!("{}: {}", provider.name(), other)),
                })?;
        }

        info!(
            "Imported slashing protection for {} keys into {} providers",
            records.len(),
            self.providers.len()
        );
        Ok(())
    }
}

fn dispatch(
    provider: &dyn RulesService,
    meta: &ReqMetadata,
    data: OperationData<'_>,
) -> Result<RuleResult> {
    match data {
        OperationData::CreateAccount(d) => provider.on_create_account(meta, d),
        OperationData::ListAccounts(d) => provider.on_list_accounts(meta, d),
        OperationData::LockAccount(d) => provider.on_lock_account(meta, d),
        OperationData::LockWallet(d) => provider.on_lock_wallet(meta, d),
        OperationData::UnlockAccount(d) => provider.on_unlock_account(meta, d),
        OperationData::UnlockWallet(d) => provider.on_unlock_wallet(meta, d),
        OperationData::Sign(d) => provider.on_sign(meta, d),
        OperationData::SignBeaconAttestation(d) => provider.on_sign_beacon_attestation(meta, d),
        OperationData::SignBeaconProposal(d) => provider.on_sign_beacon_proposal(meta, d),
    }
}

/// Run a provider call, turning errors and panics into `ProviderFault`
fn invoke<T>(
    provider: &dyn RulesService,
    kind: OperationKind,
    call: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("Rule provider {} failed during {}: {}", provider.name(), kind, e);
            Err(SlashGuardError::ProviderFault(format!(
                "{} failed during {}: {}",
                provider.name(),
                kind,
                e
            )))
        }
        Err(_) => {
            error!("Rule provider {} panicked during {}", provider.name(), kind);
            Err(SlashGuardError::ProviderFault(format!(
                "{} panicked during {}",
                provider.name(),
                kind
            )))
        }
    }
}

fn invoke_export(
    provider: &dyn RulesService,
    call: impl FnOnce() -> Result<ProtectionMap>,
) -> Result<ProtectionMap> {
    catch_unwind(AssertUnwindSafe(call))
        .map_err(|_| {
            SlashGuardError::ProviderFault(format!("{} panicked during export", provider.name()))
        })?
        .map_err(|e| {
            error!("Rule provider {} failed during export: {}", provider.name(), e);
            SlashGuardError::ProviderFault(format!("{} failed during export: {}", provider.name(), e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::{
        ProtectionStore, PubKey, SlashingProtection, SlashingProtectionStore, PUBKEY_LENGTH,
    };
    use crate::rules::{
        ApprovingRules, DenyingRules, LockWalletData, SignBeaconProposalData, SignData,
        SlashingProtectionRules,
    };
    use crate::testing::{attestation, ScriptedRules};
    use proptest::prelude::*;

    fn meta() -> ReqMetadata {
        ReqMetadata::new("client1", "Wallet1/Account1", "req1")
            .with_pubkey(PubKey::new([1; PUBKEY_LENGTH]))
    }

    fn sign_data() -> SignData {
        SignData {
            domain: [0; 32],
            data: b"payload".to_vec(),
        }
    }

    fn scripted(results: &[RuleResult]) -> Vec<Arc<dyn RulesService>> {
        results
            .iter()
            .map(|r| Arc::new(ScriptedRules::fixed(*r)) as Arc<dyn RulesService>)
            .collect()
    }

    fn result_strategy() -> impl Strategy<Value = RuleResult> {
        prop_oneof![
            Just(RuleResult::Unknown),
            Just(RuleResult::Approved),
            Just(RuleResult::Denied),
        ]
    }

    proptest! {
        #[test]
        fn test_any_denial_denies(results in prop::collection::vec(result_strategy(), 0..8)) {
            prop_assume!(results.contains(&RuleResult::Denied));
            let ruler = Ruler::new(scripted(&results));
            let data = sign_data();
            prop_assert_eq!(
                ruler.evaluate(&meta(), OperationData::Sign(&data)).unwrap(),
                RuleResult::Denied
            );
        }

        #[test]
        fn test_approval_needs_approver(results in prop::collection::vec(result_strategy(), 0..8)) {
            let ruler = Ruler::new(scripted(&results));
            let data = sign_data();
            let expected = if !results.contains(&RuleResult::Denied)
                && results.contains(&RuleResult::Approved)
            {
                RuleResult::Approved
            } else {
                RuleResult::Denied
            };
            prop_assert_eq!(
                ruler.evaluate(&meta(), OperationData::Sign(&data)).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_empty_ruler_denies() {
        let ruler = Ruler::new(vec![]);
        let data = LockWalletData {
            wallet: "Wallet1".to_string(),
        };
        assert_eq!(
            ruler.evaluate(&meta(), OperationData::LockWallet(&data)).unwrap(),
            RuleResult::Denied
        );
    }

    #[test]
    fn test_all_abstain_denies() {
        let ruler = Ruler::new(scripted(&[RuleResult::Unknown, RuleResult::Unknown]));
        let data = sign_data();
        assert_eq!(
            ruler.evaluate(&meta(), OperationData::Sign(&data)).unwrap(),
            RuleResult::Denied
        );
    }

    #[test]
    fn test_short_circuit_on_denial() {
        let after = Arc::new(ScriptedRules::fixed(RuleResult::Approved));
        let ruler = Ruler::new(vec![
            Arc::new(DenyingRules::new()),
            after.clone() as Arc<dyn RulesService>,
        ]);
        let data = sign_data();
        ruler.evaluate(&meta(), OperationData::Sign(&data)).unwrap();
        assert_eq!(after.calls(), 0);
    }

    #[test]
    fn test_provider_error_is_fault() {
        let ruler = Ruler::new(vec![
            Arc::new(ApprovingRules::new()),
            Arc::new(ScriptedRules::failing()),
        ]);
        let data = sign_data();
        let err = ruler
            .evaluate(&meta(), OperationData::Sign(&data))
            .unwrap_err();
        assert!(matches!(err, SlashGuardError::ProviderFault(_)));
    }

    #[test]
    fn test_provider_panic_is_fault() {
        let ruler = Ruler::new(vec![Arc::new(ScriptedRules::panicking())]);
        let data = sign_data();
        let err = ruler
            .evaluate(&meta(), OperationData::Sign(&data))
            .unwrap_err();
        assert!(matches!(err, SlashGuardError::ProviderFault(_)));
    }

    #[test]
    fn test_batch_is_index_aligned() {
        let ruler = Ruler::new(vec![
            Arc::new(ApprovingRules::new()),
            Arc::new(ScriptedRules::batch(vec![
                RuleResult::Unknown,
                RuleResult::Denied,
                RuleResult::Unknown,
            ])),
        ]);
        let metas = vec![meta(); 3];
        let data = vec![attestation(1, 2), attestation(2, 3), attestation(3, 4)];
        assert_eq!(
            ruler.evaluate_batch(&metas, &data).unwrap(),
            vec![RuleResult::Approved, RuleResult::Denied, RuleResult::Approved]
        );
    }

    #[test]
    fn test_batch_all_abstain_denies() {
        let ruler = Ruler::new(scripted(&[RuleResult::Unknown]));
        let metas = vec![meta(); 2];
        let data = vec![attestation(1, 2), attestation(2, 3)];
        assert_eq!(
            ruler.evaluate_batch(&metas, &data).unwrap(),
            vec![RuleResult::Denied; 2]
        );
    }

    #[test]
    fn test_batch_length_mismatch_is_fault() {
        let ruler = Ruler::new(vec![Arc::new(ScriptedRules::batch(vec![RuleResult::Approved]))]);
        let metas = vec![meta(); 2];
        let data = vec![attestation(1, 2), attestation(2, 3)];
        let err = ruler.evaluate_batch(&metas, &data).unwrap_err();
        assert!(matches!(err, SlashGuardError::ProviderFault(_)));
    }

    #[test]
    fn test_batch_rejects_misaligned_input() {
        let ruler = Ruler::new(vec![Arc::new(ApprovingRules::new())]);
        let err = ruler
            .evaluate_batch(&[meta()], &[attestation(1, 2), attestation(2, 3)])
            .unwrap_err();
        assert!(matches!(err, SlashGuardError::InvalidRequest(_)));
    }

    #[test]
    fn test_proposal_scenario() {
        let store = Arc::new(ProtectionStore::in_memory());
        let ruler = Ruler::new(vec![Arc::new(SlashingProtectionRules::new(store.clone()))]);
        let key = PubKey::new([1; PUBKEY_LENGTH]);
        let proposal = |slot| SignBeaconProposalData {
            domain: [0; 32],
            slot,
            proposer_index: 0,
            parent_root: [0; 32],
            state_root: [0; 32],
            body_root: [0; 32],
        };

        let first = proposal(100);
        assert_eq!(
            ruler.evaluate(&meta(), OperationData::SignBeaconProposal(&first)).unwrap(),
            RuleResult::Approved
        );
        store.commit(&key).unwrap();

        let repeat = proposal(100);
        assert_eq!(
            ruler.evaluate(&meta(), OperationData::SignBeaconProposal(&repeat)).unwrap(),
            RuleResult::Denied
        );

        let next = proposal(101);
        assert_eq!(
            ruler.evaluate(&meta(), OperationData::SignBeaconProposal(&next)).unwrap(),
            RuleResult::Approved
        );
    }

    #[test]
    fn test_export_merges_and_import_validates() {
        let store = Arc::new(ProtectionStore::in_memory());
        let ruler = Ruler::new(vec![
            Arc::new(DenyingRules::new()),
            Arc::new(SlashingProtectionRules::new(store)),
        ]);

        let mut records = ProtectionMap::new();
        records.insert(PubKey::new([2; PUBKEY_LENGTH]), SlashingProtection::attestation(1, 2));
        ruler.import_slashing_protection(&records).unwrap();
        assert_eq!(ruler.export_slashing_protection().unwrap(), records);

        let mut bad = ProtectionMap::new();
        bad.insert(PubKey::new([3; PUBKEY_LENGTH]), SlashingProtection::attestation(4, 1));
        let err = ruler.import_slashing_protection(&bad).unwrap_err();
        assert!(matches!(err, SlashGuardError::ImportFault(_)));
        assert_eq!(ruler.export_slashing_protection().unwrap(), records);
    }

    #[test]
    fn test_batch_verdicts_name_slashing_denials() {
        let store = Arc::new(ProtectionStore::in_memory());
        let ruler = Ruler::new(vec![
            Arc::new(ScriptedRules::batch(vec![
                RuleResult::Denied,
                RuleResult::Unknown,
                RuleResult::Unknown,
            ])),
            Arc::new(SlashingProtectionRules::new(store)),
        ]);
        let key = |b| PubKey::new([b; PUBKEY_LENGTH]);
        let metas = vec![
            meta().with_pubkey(key(1)),
            meta().with_pubkey(key(1)),
            meta().with_pubkey(key(2)),
        ];
        let data = vec![attestation(1, 2), attestation(1, 3), attestation(1, 2)];

        let verdicts = ruler.evaluate_batch_verdicts(&metas, &data).unwrap();
        assert_eq!(
            verdicts,
            vec![
                // Denied by the scripted provider before the gate saw it
                BatchVerdict {
                    result: RuleResult::Denied,
                    slashing_denial: false,
                },
                // Repeated key, refused by the gate
                BatchVerdict {
                    result: RuleResult::Denied,
                    slashing_denial: true,
                },
                BatchVerdict {
                    result: RuleResult::Approved,
                    slashing_denial: false,
                },
            ]
        );
    }
}
