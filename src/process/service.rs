//! Request orchestration
//!
//! Every operation runs the same sequence: resolve the request, check the
//! caller's access, run the rules, then perform the action. Signing steps
//! run inside the key's exclusive section, and any slashing protection
//! reservation is committed only once a signature exists.
//!
//! Beacon signing is always gated on the protection store, whichever rule
//! providers are configured. A slashing protection provider reserves during
//! rule evaluation; otherwise the processor reserves once the rules approve.

use crate::checker::{Action, Checker, Credentials, StaticChecker};
use crate::config::Config;
use crate::errors::{Result, SlashGuardError};
use crate::fetcher::{split_account_name, Account, AccountRef, Fetcher, SigningRequest};
use crate::process::locks::KeyLocks;
use crate::process::requests::*;
use crate::process::reservation::ReservationGuard;
use crate::protection::{
    ProtectionMap, ProtectionStore, PubKey, Reservation, SlashingProtection,
    SlashingProtectionStore,
};
use crate::rules::{
    build_providers, AccessAccountData, CreateAccountData, LockAccountData, LockWalletData,
    OperationData, OperationKind, ReqMetadata, RuleResult, UnlockAccountData, UnlockWalletData,
};
use crate::ruler::Ruler;
use secrecy::{ExposeSecret, Secret};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Builder for [`Processor`]. Every collaborator is mandatory.
#[derive(Default)]
pub struct ProcessorBuilder {
    checker: Option<Arc<dyn Checker>>,
    ruler: Option<Arc<Ruler>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    store: Option<Arc<dyn SlashingProtectionStore>>,
}

impl ProcessorBuilder {
    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_ruler(mut self, ruler: Arc<Ruler>) -> Self {
        self.ruler = Some(ruler);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SlashingProtectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Processor> {
        let checker = self
            .checker
            .ok_or_else(|| SlashGuardError::ConfigError("no checker specified".to_string()))?;
        let ruler = self
            .ruler
            .ok_or_else(|| SlashGuardError::ConfigError("no ruler specified".to_string()))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| SlashGuardError::ConfigError("no fetcher specified".to_string()))?;
        let store = self.store.ok_or_else(|| {
            SlashGuardError::ConfigError("no slashing protection store specified".to_string())
        })?;

        Ok(Processor {
            checker,
            ruler,
            fetcher,
            store,
            key_locks: KeyLocks::new(),
            protection_section: RwLock::new(()),
        })
    }
}

/// The request-level coordinator
pub struct Processor {
    checker: Arc<dyn Checker>,
    ruler: Arc<Ruler>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn SlashingProtectionStore>,
    key_locks: KeyLocks,
    /// Shared by signing requests, exclusive for export and import
    protection_section: RwLock<()>,
}

impl Processor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::default()
    }

    /// Wire checker, providers and store from configuration
    pub fn from_config(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let store: Arc<dyn SlashingProtectionStore> = match &config.storage.slashing_protection_path
        {
            Some(path) => Arc::new(ProtectionStore::open(path)?),
            None => {
                warn!("No slashing protection path configured; records will not survive a restart");
                Arc::new(ProtectionStore::in_memory())
            }
        };
        let providers = build_providers(&config.rules.providers, store.clone())?;
        let checker = StaticChecker::new(&config.permissions)?;
        let ruler = Ruler::new(providers);
        info!("Rule providers: {:?}", ruler.provider_names());

        Processor::builder()
            .with_checker(Arc::new(checker))
            .with_ruler(Arc::new(ruler))
            .with_fetcher(fetcher)
            .with_store(store)
            .build()
    }

    pub fn ruler(&self) -> &Ruler {
        &self.ruler
    }

    // Account management

    pub async fn create_account(
        &self,
        credentials: &Credentials,
        request: &CreateAccountRequest,
    ) -> Result<AccountSummary> {
        if request.account.is_empty() || request.account.contains('/') {
            return Err(SlashGuardError::InvalidRequest(format!(
                "Invalid account name: {}",
                request.account
            )));
        }
        let wallet = self.fetcher.fetch_wallet(&request.wallet)?;
        let name = format!("{}/{}", request.wallet, request.account);
        self.check_access(credentials, &name, Action::CreateAccount)?;

        let meta = self.metadata(credentials, &name, None);
        let data = CreateAccountData {
            wallet: request.wallet.clone(),
            account: request.account.clone(),
        };
        self.decide(&meta, OperationData::CreateAccount(&data))?;

        let account = wallet
            .create_account(&request.account, &request.passphrase)
            .await
            .map_err(|e| action_fault(OperationKind::CreateAccount, e))?;

        info!("Created account {} (request {})", name, meta.request_id);
        Ok(AccountSummary {
            name: account.full_name(),
            public_key: account.public_key(),
        })
    }

    /// Filter the named accounts down to those the caller may see
    pub async fn list_accounts(
        &self,
        credentials: &Credentials,
        request: &ListAccountsRequest,
    ) -> Result<Vec<AccountSummary>> {
        let mut visible = Vec::new();

        for name in &request.accounts {
            let Some((wallet, account_name)) = split_account_name(name) else {
                debug!("Skipping malformed account name {}", name);
                continue;
            };
            let account = match self.fetcher.fetch_account(&AccountRef::name(name)) {
                Ok(account) => account,
                Err(e) => {
                    debug!("Skipping account {}: {}", name, e);
                    continue;
                }
            };
            if !self.checker.check(credentials, name, Action::Access) {
                continue;
            }

            let meta = self.metadata(credentials, name, Some(account.public_key()));
            let data = AccessAccountData {
                wallet: wallet.to_string(),
                account: account_name.to_string(),
            };
            if self.ruler.evaluate(&meta, OperationData::ListAccounts(&data))? == RuleResult::Approved {
                visible.push(AccountSummary {
                    name: account.full_name(),
                    public_key: account.public_key(),
                });
            }
        }

        Ok(visible)
    }

    pub async fn lock_account(
        &self,
        credentials: &Credentials,
        request: &LockAccountRequest,
    ) -> Result<()> {
        let account = self.fetcher.fetch_account(&request.account)?;
        let name = account.full_name();
        self.check_access(credentials, &name, Action::LockAccount)?;

        let meta = self.metadata(credentials, &name, Some(account.public_key()));
        let data = LockAccountData {
            wallet: account.wallet_name().to_string(),
            account: account.name().to_string(),
        };
        self.decide(&meta, OperationData::LockAccount(&data))?;

        account
            .lock()
            .await
            .map_err(|e| action_fault(OperationKind::LockAccount, e))?;
        info!("Locked account {} (request {})", name, meta.request_id);
        Ok(())
    }

    pub async fn unlock_account(
        &self,
        credentials: &Credentials,
        request: &UnlockAccountRequest,
    ) -> Result<()> {
        let account = self.fetcher.fetch_account(&request.account)?;
        let name = account.full_name();
        self.check_access(credentials, &name, Action::UnlockAccount)?;

        let meta = self.metadata(credentials, &name, Some(account.public_key()));
        let data = UnlockAccountData {
            wallet: account.wallet_name().to_string(),
            account: account.name().to_string(),
            passphrase: Secret::new(request.passphrase.expose_secret().clone()),
        };
        self.decide(&meta, OperationData::UnlockAccount(&data))?;

        account
            .unlock(&request.passphrase)
            .await
            .map_err(|e| action_fault(OperationKind::UnlockAccount, e))?;
        info!("Unlocked account {} (request {})", name, meta.request_id);
        Ok(())
    }

    pub async fn lock_wallet(
        &self,
        credentials: &Credentials,
        request: &LockWalletRequest,
    ) -> Result<()> {
        let wallet = self.fetcher.fetch_wallet(&request.wallet)?;
        self.check_access(credentials, &request.wallet, Action::LockWallet)?;

        let meta = self.metadata(credentials, &request.wallet, None);
        let data = LockWalletData {
            wallet: request.wallet.clone(),
        };
        self.decide(&meta, OperationData::LockWallet(&data))?;

        wallet
            .lock()
            .await
            .map_err(|e| action_fault(OperationKind::LockWallet, e))?;
        info!("Locked wallet {} (request {})", request.wallet, meta.request_id);
        Ok(())
    }

    pub async fn unlock_wallet(
        &self,
        credentials: &Credentials,
        request: &UnlockWalletRequest,
    ) -> Result<()> {
        let wallet = self.fetcher.fetch_wallet(&request.wallet)?;
        self.check_access(credentials, &request.wallet, Action::UnlockWallet)?;

        let meta = self.metadata(credentials, &request.wallet, None);
        let data = UnlockWalletData {
            wallet: request.wallet.clone(),
            passphrase: Secret::new(request.passphrase.expose_secret().clone()),
        };
        self.decide(&meta, OperationData::UnlockWallet(&data))?;

        wallet
            .unlock(&request.passphrase)
            .await
            .map_err(|e| action_fault(OperationKind::UnlockWallet, e))?;
        info!("Unlocked wallet {} (request {})", request.wallet, meta.request_id);
        Ok(())
    }

    // Signing

    pub async fn sign(&self, credentials: &Credentials, request: &SignRequest) -> Result<Vec<u8>> {
        let account = self.fetcher.fetch_account(&request.account)?;
        self.check_access(credentials, &account.full_name(), Action::Sign)?;

        let meta = self.metadata(credentials, &account.full_name(), Some(account.public_key()));
        self.sign_protected(
            &meta,
            &account,
            OperationData::Sign(&request.data),
            None,
            SigningRequest::Generic(&request.data),
        )
        .await
    }

    pub async fn sign_beacon_attestation(
        &self,
        credentials: &Credentials,
        request: &SignBeaconAttestationRequest,
    ) -> Result<Vec<u8>> {
        let account = self.fetcher.fetch_account(&request.account)?;
        self.check_access(credentials, &account.full_name(), Action::SignBeaconAttestation)?;

        let meta = self.metadata(credentials, &account.full_name(), Some(account.public_key()));
        let candidate = SlashingProtection::attestation(
            request.data.source.epoch,
            request.data.target.epoch,
        );
        self.sign_protected(
            &meta,
            &account,
            OperationData::SignBeaconAttestation(&request.data),
            Some(candidate),
            SigningRequest::BeaconAttestation(&request.data),
        )
        .await
    }

    pub async fn sign_beacon_proposal(
        &self,
        credentials: &Credentials,
        request: &SignBeaconProposalRequest,
    ) -> Result<Vec<u8>> {
        let account = self.fetcher.fetch_account(&request.account)?;
        self.check_access(credentials, &account.full_name(), Action::SignBeaconProposal)?;

        let meta = self.metadata(credentials, &account.full_name(), Some(account.public_key()));
        self.sign_protected(
            &meta,
            &account,
            OperationData::SignBeaconProposal(&request.data),
            Some(SlashingProtection::proposal(request.data.slot)),
            SigningRequest::BeaconProposal(&request.data),
        )
        .await
    }

    /// Sign a batch of attestations.
    ///
    /// The outer error covers failures of the whole batch: an unknown
    /// account, a failed access check, or a rule provider fault. Otherwise
    /// every item gets its own outcome, in input order.
    pub async fn sign_beacon_attestations(
        &self,
        credentials: &Credentials,
        requests: &[SignBeaconAttestationRequest],
    ) -> Result<Vec<Result<Vec<u8>>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut accounts = Vec::with_capacity(requests.len());
        let mut metas = Vec::with_capacity(requests.len());
        for request in requests {
            let account = self.fetcher.fetch_account(&request.account)?;
            let name = account.full_name();
            self.check_access(credentials, &name, Action::SignBeaconAttestation)?;
            metas.push(self.metadata(credentials, &name, Some(account.public_key())));
            accounts.push(account);
        }
        let data: Vec<_> = requests.iter().map(|r| r.data.clone()).collect();

        let mut occurrences: HashMap<PubKey, usize> = HashMap::new();
        for account in &accounts {
            *occurrences.entry(account.public_key()).or_default() += 1;
        }
        let keys: BTreeSet<PubKey> = occurrences.keys().copied().collect();

        let _section = self.protection_section.read().await;
        let _key_guards = self.key_locks.lock_all(&keys).await;
        let mut reservation = ReservationGuard::new(self.store.clone(), keys.iter().copied());
        for key in &keys {
            self.release_stale(key)?;
        }

        let verdicts = self.ruler.evaluate_batch_verdicts(&metas, &data)?;

        let approved_keys: BTreeSet<PubKey> = accounts
            .iter()
            .zip(&verdicts)
            .filter(|(_, verdict)| verdict.result.is_approved())
            .map(|(account, _)| account.public_key())
            .collect();
        for key in keys.difference(&approved_keys) {
            reservation.rollback(key)?;
        }

        // Keys a provider already gated and reserved in this pass
        let mut provider_reserved = BTreeSet::new();
        for key in &approved_keys {
            if self.store.is_reserved(key)? {
                provider_reserved.insert(*key);
            }
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        let mut signed_keys = BTreeSet::new();
        for (index, account) in accounts.iter().enumerate() {
            let key = account.public_key();
            let meta = &metas[index];
            let item = &data[index];

            let candidate = SlashingProtection::attestation(item.source.epoch, item.target.epoch);
            let verdict = verdicts[index];

            if !verdict.result.is_approved() {
                let repeated = occurrences.get(&key).copied().unwrap_or(0) > 1;
                let denial = if repeated && verdict.slashing_denial {
                    SlashGuardError::ConsistencyViolation(format!(
                        "{}: multiple attestations for one key in a batch",
                        key
                    ))
                } else {
                    self.classify_denial(
                        meta,
                        OperationKind::SignBeaconAttestations,
                        &key,
                        Some(&candidate),
                    )
                };
                outcomes.push(Err(denial));
                continue;
            }

            if !provider_reserved.contains(&key) {
                if let Err(e) = self.reserve_candidate(meta, &key, &candidate) {
                    outcomes.push(Err(e));
                    continue;
                }
            }

            match account.sign(SigningRequest::BeaconAttestation(item)).await {
                Ok(signature) => {
                    signed_keys.insert(key);
                    outcomes.push(Ok(signature));
                }
                Err(e) => {
                    error!(
                        "Signing attestation for {} failed (request {}): {}",
                        account.full_name(),
                        meta.request_id,
                        e
                    );
                    outcomes.push(Err(action_fault(OperationKind::SignBeaconAttestations, e)));
                }
            }
        }

        // A key that produced any signature keeps its reservation.
        for key in &keys {
            if signed_keys.contains(key) {
                reservation.commit(key)?;
            } else {
                reservation.rollback(key)?;
            }
        }

        info!(
            "Signed {}/{} attestations (request {})",
            signed_keys.len(),
            requests.len(),
            credentials.request_id
        );
        Ok(outcomes)
    }

    // Slashing protection data

    /// Export slashing protection from every provider. Blocks all signing
    /// while it runs.
    pub async fn export_slashing_protection(&self) -> Result<ProtectionMap> {
        let _section = self.protection_section.write().await;
        let records = self.ruler.export_slashing_protection()?;
        info!("Exported slashing protection for {} keys", records.len());
        Ok(records)
    }

    /// Import slashing protection into every provider. Blocks all signing
    /// while it runs.
    pub async fn import_slashing_protection(&self, records: &ProtectionMap) -> Result<()> {
        let _section = self.protection_section.write().await;
        self.ruler.import_slashing_protection(records)
    }

    // Helpers

    fn metadata(&self, credentials: &Credentials, account: &str, pubkey: Option<PubKey>) -> ReqMetadata {
        let mut meta = ReqMetadata::new(&credentials.client, account, &credentials.request_id);
        meta.pubkey = pubkey;
        meta.ip = credentials.ip.clone();
        meta
    }

    fn check_access(&self, credentials: &Credentials, account: &str, action: Action) -> Result<()> {
        if self.checker.check(credentials, account, action) {
            return Ok(());
        }
        Err(SlashGuardError::AccessDenied(format!(
            "client {} may not {} on {}",
            credentials.client, action, account
        )))
    }

    fn decide(&self, meta: &ReqMetadata, data: OperationData<'_>) -> Result<()> {
        match self.ruler.evaluate(meta, data)? {
            RuleResult::Approved => Ok(()),
            _ => Err(SlashGuardError::PolicyDenied(format!(
                "{} request {} on {} denied by rules",
                data.kind(),
                meta.request_id,
                meta.account
            ))),
        }
    }

    /// Rule, perform and resolve a single signing request inside the key's
    /// exclusive section.
    async fn sign_protected(
        &self,
        meta: &ReqMetadata,
        account: &Arc<dyn Account>,
        data: OperationData<'_>,
        candidate: Option<SlashingProtection>,
        signing: SigningRequest<'_>,
    ) -> Result<Vec<u8>> {
        let key = account.public_key();
        let _section = self.protection_section.read().await;
        let _key_guard = self.key_locks.lock(key).await;
        let mut reservation =
            ReservationGuard::new(self.store.clone(), candidate.map(|_| key));
        if candidate.is_some() {
            self.release_stale(&key)?;
        }

        if self.ruler.evaluate(meta, data)? != RuleResult::Approved {
            reservation.rollback(&key)?;
            return Err(self.classify_denial(meta, data.kind(), &key, candidate.as_ref()));
        }

        if let Some(candidate) = &candidate {
            if !self.store.is_reserved(&key)? {
                self.reserve_candidate(meta, &key, candidate)?;
            }
        }

        let signature = account.sign(signing).await.map_err(|e| {
            error!(
                "Signing {} for {} failed (request {}): {}",
                data.kind(),
                meta.account,
                meta.request_id,
                e
            );
            action_fault(data.kind(), e)
        })?;
        reservation.commit(&key)?;

        info!(
            "Signed {} for {} (request {})",
            data.kind(),
            meta.account,
            meta.request_id
        );
        Ok(signature)
    }

    /// Drop a reservation left on a key whose section this request now holds.
    /// No request holds one at this point, so it can only be stale.
    fn release_stale(&self, key: &PubKey) -> Result<()> {
        if self.store.is_reserved(key)? {
            warn!("Releasing stale slashing protection reservation for {}", key);
            self.store.rollback(key)?;
        }
        Ok(())
    }

    /// Gate an approved request on the store when no provider did so
    fn reserve_candidate(
        &self,
        meta: &ReqMetadata,
        key: &PubKey,
        candidate: &SlashingProtection,
    ) -> Result<()> {
        match self.store.reserve(key, candidate)? {
            Reservation::Reserved => Ok(()),
            Reservation::Conflict(conflict) => {
                warn!(
                    "Refusing slashable request {} for {}: {}",
                    meta.request_id, key, conflict
                );
                Err(SlashGuardError::ConsistencyViolation(format!(
                    "{}: {}",
                    key, conflict
                )))
            }
        }
    }

    /// Tell a slashing protection refusal apart from any other denial
    fn classify_denial(
        &self,
        meta: &ReqMetadata,
        kind: OperationKind,
        key: &PubKey,
        candidate: Option<&SlashingProtection>,
    ) -> SlashGuardError {
        if let Some(candidate) = candidate {
            match self.store.get(key) {
                Ok(record) => {
                    if let Err(conflict) = record.unwrap_or_default().check(candidate) {
                        return SlashGuardError::ConsistencyViolation(format!(
                            "{}: {}",
                            key, conflict
                        ));
                    }
                }
                Err(e) => return e,
            }
        }
        debug!("{} request {} denied by rules", kind, meta.request_id);
        SlashGuardError::PolicyDenied(format!(
            "{} request {} on {} denied by rules",
            kind, meta.request_id, meta.account
        ))
    }
}

fn action_fault(kind: OperationKind, err: SlashGuardError) -> SlashGuardError {
    match err {
        SlashGuardError::ActionFault(_) => err,
        other => SlashGuardError::ActionFault(format!("{}: {}", kind, other)),
    }
}
