//! Account and wallet resolution
//!
//! The custodian core never touches key material. It resolves names to
//! handles through a [`Fetcher`] and asks those handles to sign, lock,
//! unlock and create.

use crate::errors::Result;
use crate::protection::PubKey;
use crate::rules::{Passphrase, SignBeaconAttestationData, SignBeaconProposalData, SignData};
use std::fmt;
use std::sync::Arc;

/// How a request names its account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    /// `wallet/account`
    Name(String),
    PubKey(PubKey),
}

impl AccountRef {
    pub fn name(name: &str) -> Self {
        AccountRef::Name(name.to_string())
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Name(name) => f.write_str(name),
            AccountRef::PubKey(key) => write!(f, "{}", key),
        }
    }
}

/// Split `wallet/account` into its parts
pub fn split_account_name(name: &str) -> Option<(&str, &str)> {
    let (wallet, account) = name.split_once('/')?;
    if wallet.is_empty() || account.is_empty() {
        return None;
    }
    Some((wallet, account))
}

/// Payload handed to an account for signing
#[derive(Debug, Clone, Copy)]
pub enum SigningRequest<'a> {
    Generic(&'a SignData),
    BeaconAttestation(&'a SignBeaconAttestationData),
    BeaconProposal(&'a SignBeaconProposalData),
}

/// Handle to a single account
#[tonic::async_trait]
pub trait Account: Send + Sync {
    fn wallet_name(&self) -> &str;

    fn name(&self) -> &str;

    fn public_key(&self) -> PubKey;

    fn full_name(&self) -> String {
        format!("{}/{}", self.wallet_name(), self.name())
    }

    async fn unlock(&self, passphrase: &Passphrase) -> Result<()>;

    async fn lock(&self) -> Result<()>;

    async fn sign(&self, request: SigningRequest<'_>) -> Result<Vec<u8>>;
}

/// Handle to a wallet
#[tonic::async_trait]
pub trait Wallet: Send + Sync {
    fn name(&self) -> &str;

    async fn unlock(&self, passphrase: &Passphrase) -> Result<()>;

    async fn lock(&self) -> Result<()>;

    async fn create_account(&self, name: &str, passphrase: &Passphrase)
        -> Result<Arc<dyn Account>>;
}

/// Resolves names to account and wallet handles
pub trait Fetcher: Send + Sync {
    /// Fails with `AccountNotFound` for unknown accounts
    fn fetch_account(&self, account: &AccountRef) -> Result<Arc<dyn Account>>;

    /// Fails with `WalletNotFound` for unknown wallets
    fn fetch_wallet(&self, name: &str) -> Result<Arc<dyn Wallet>>;
}
