//! Test doubles shared across module tests

use crate::errors::{Result, SlashGuardError};
use crate::fetcher::{split_account_name, Account, AccountRef, Fetcher, SigningRequest, Wallet};
use crate::protection::{PubKey, PUBKEY_LENGTH};
use crate::rules::*;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub fn attestation(source: u64, target: u64) -> SignBeaconAttestationData {
    SignBeaconAttestationData {
        domain: [0; 32],
        slot: target * 32,
        committee_index: 0,
        beacon_block_root: [0; 32],
        source: Checkpoint {
            epoch: source,
            root: [0; 32],
        },
        target: Checkpoint {
            epoch: target,
            root: [0; 32],
        },
    }
}

pub fn proposal(slot: u64) -> SignBeaconProposalData {
    SignBeaconProposalData {
        domain: [0; 32],
        slot,
        proposer_index: 0,
        parent_root: [0; 32],
        state_root: [0; 32],
        body_root: [0; 32],
    }
}

enum Script {
    Fixed(RuleResult),
    Batch(Vec<RuleResult>),
    Failing,
    Panicking,
}

/// Provider with canned answers
pub struct ScriptedRules {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedRules {
    fn with(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(result: RuleResult) -> Self {
        Self::with(Script::Fixed(result))
    }

    /// Fixed answers for batches; abstains on single requests
    pub fn batch(results: Vec<RuleResult>) -> Self {
        Self::with(Script::Batch(results))
    }

    pub fn failing() -> Self {
        Self::with(Script::Failing)
    }

    pub fn panicking() -> Self {
        Self::with(Script::Panicking)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<RuleResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Fixed(result) => Ok(*result),
            Script::Batch(_) => Ok(RuleResult::Unknown),
            Script::Failing => Err(SlashGuardError::InternalError("scripted failure".to_string())),
            Script::Panicking => panic!("scripted panic"),
        }
    }
}

impl RulesService for ScriptedRules {
    fn name(&self) -> &str {
        "scripted"
    }

    fn on_create_account(&self, _: &ReqMetadata, _: &CreateAccountData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_list_accounts(&self, _: &ReqMetadata, _: &AccessAccountData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_lock_account(&self, _: &ReqMetadata, _: &LockAccountData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_lock_wallet(&self, _: &ReqMetadata, _: &LockWalletData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_unlock_account(&self, _: &ReqMetadata, _: &UnlockAccountData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_unlock_wallet(&self, _: &ReqMetadata, _: &UnlockWalletData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_sign(&self, _: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        self.answer()
    }

    fn on_sign_beacon_attestation(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        self.answer()
    }

    fn on_sign_beacon_attestations(
        &self,
        metas: &[ReqMetadata],
        data: &[SignBeaconAttestationData],
    ) -> Result<Vec<RuleResult>> {
        if let Script::Batch(results) = &self.script {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Ok(results.clone());
        }
        metas
            .iter()
            .zip(data)
            .map(|(meta, item)| self.on_sign_beacon_attestation(meta, item))
            .collect()
    }

    fn on_sign_beacon_proposal(
        &self,
        _: &ReqMetadata,
        _: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        self.answer()
    }
}

/// Deterministic key for a `wallet/account` name
pub fn key_for(name: &str) -> PubKey {
    let mut bytes = [0u8; PUBKEY_LENGTH];
    for (slot, b) in bytes.iter_mut().zip(name.bytes()) {
        *slot = b;
    }
    PubKey::new(bytes)
}

/// Account that "signs" by formatting a string
pub struct MemoryAccount {
    wallet: String,
    name: String,
    key: PubKey,
    passphrase: Vec<u8>,
    unlocked: AtomicBool,
    fail_signing: AtomicBool,
    sign_delay_ms: AtomicU64,
    signed: AtomicUsize,
}

impl MemoryAccount {
    pub fn new(wallet: &str, name: &str, passphrase: &[u8]) -> Self {
        Self {
            wallet: wallet.to_string(),
            name: name.to_string(),
            key: key_for(&format!("{}/{}", wallet, name)),
            passphrase: passphrase.to_vec(),
            unlocked: AtomicBool::new(true),
            fail_signing: AtomicBool::new(false),
            sign_delay_ms: AtomicU64::new(0),
            signed: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    pub fn set_sign_delay(&self, delay: Duration) {
        self.sign_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Number of signatures produced
    pub fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl Account for MemoryAccount {
    fn wallet_name(&self) -> &str {
        &self.wallet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn public_key(&self) -> PubKey {
        self.key
    }

    async fn unlock(&self, passphrase: &Passphrase) -> Result<()> {
        if passphrase.expose_secret() != &self.passphrase {
            return Err(SlashGuardError::ActionFault("incorrect passphrase".to_string()));
        }
        self.unlocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        self.unlocked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn sign(&self, request: SigningRequest<'_>) -> Result<Vec<u8>> {
        let delay = self.sign_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.is_unlocked() {
            return Err(SlashGuardError::ActionFault("account is locked".to_string()));
        }
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(SlashGuardError::InternalError("signer unavailable".to_string()));
        }

        let what = match request {
            SigningRequest::Generic(_) => "generic".to_string(),
            SigningRequest::BeaconAttestation(d) => {
                format!("attestation:{}:{}", d.source.epoch, d.target.epoch)
            }
            SigningRequest::BeaconProposal(d) => format!("proposal:{}", d.slot),
        };
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{}", self.key.to_hex(), what).into_bytes())
    }
}

pub struct MemoryWallet {
    name: String,
    passphrase: Vec<u8>,
    unlocked: AtomicBool,
    accounts: RwLock<HashMap<String, Arc<MemoryAccount>>>,
}

impl MemoryWallet {
    pub fn new(name: &str, passphrase: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            passphrase: passphrase.to_vec(),
            unlocked: AtomicBool::new(false),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_account(&self, name: &str, passphrase: &[u8]) -> Arc<MemoryAccount> {
        let account = Arc::new(MemoryAccount::new(&self.name, name, passphrase));
        self.accounts
            .write()
            .unwrap()
            .insert(name.to_string(), account.clone());
        account
    }

    pub fn account(&self, name: &str) -> Option<Arc<MemoryAccount>> {
        self.accounts.read().unwrap().get(name).cloned()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl Wallet for MemoryWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn unlock(&self, passphrase: &Passphrase) -> Result<()> {
        if passphrase.expose_secret() != &self.passphrase {
            return Err(SlashGuardError::ActionFault("incorrect passphrase".to_string()));
        }
        self.unlocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        self.unlocked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn create_account(&self, name: &str, passphrase: &Passphrase) -> Result<Arc<dyn Account>> {
        if !self.is_unlocked() {
            return Err(SlashGuardError::ActionFault("wallet is locked".to_string()));
        }
        if self.account(name).is_some() {
            return Err(SlashGuardError::ActionFault(format!("account {} already exists", name)));
        }
        let account = self.add_account(name, passphrase.expose_secret());
        Ok(account as Arc<dyn Account>)
    }
}

/// Fetcher over in-memory wallets
#[derive(Default)]
pub struct MemoryFetcher {
    wallets: RwLock<HashMap<String, Arc<MemoryWallet>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, name: &str, passphrase: &[u8]) -> Arc<MemoryWallet> {
        let wallet = Arc::new(MemoryWallet::new(name, passphrase));
        self.wallets
            .write()
            .unwrap()
            .insert(name.to_string(), wallet.clone());
        wallet
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch_account(&self, account: &AccountRef) -> Result<Arc<dyn Account>> {
        let wallets = self.wallets.read().unwrap();
        let found = match account {
            AccountRef::Name(name) => split_account_name(name).and_then(|(wallet, account)| {
                wallets.get(wallet).and_then(|w| w.account(account))
            }),
            AccountRef::PubKey(key) => wallets.values().find_map(|w| {
                w.accounts
                    .read()
                    .unwrap()
                    .values()
                    .find(|a| a.public_key() == *key)
                    .cloned()
            }),
        };
        found
            .map(|a| a as Arc<dyn Account>)
            .ok_or_else(|| SlashGuardError::AccountNotFound(account.to_string()))
    }

    fn fetch_wallet(&self, name: &str) -> Result<Arc<dyn Wallet>> {
        self.wallets
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .map(|w| w as Arc<dyn Wallet>)
            .ok_or_else(|| SlashGuardError::WalletNotFound(name.to_string()))
    }
}
