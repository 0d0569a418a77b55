//! Inbound request shapes, one per operation kind

use crate::fetcher::AccountRef;
use crate::protection::PubKey;
use crate::rules::{Passphrase, SignBeaconAttestationData, SignBeaconProposalData, SignData};

pub struct CreateAccountRequest {
    pub wallet: String,
    pub account: String,
    pub passphrase: Passphrase,
}

#[derive(Debug, Clone)]
pub struct ListAccountsRequest {
    /// `wallet/account` names to consider
    pub accounts: Vec<String>,
}

/// An account the caller may see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub name: String,
    pub public_key: PubKey,
}

#[derive(Debug, Clone)]
pub struct LockAccountRequest {
    pub account: AccountRef,
}

pub struct UnlockAccountRequest {
    pub account: AccountRef,
    pub passphrase: Passphrase,
}

#[derive(Debug, Clone)]
pub struct LockWalletRequest {
    pub wallet: String,
}

pub struct UnlockWalletRequest {
    pub wallet: String,
    pub passphrase: Passphrase,
}

#[derive(Debug, Clone)]
pub struct SignRequest {
    pub account: AccountRef,
    pub data: SignData,
}

#[derive(Debug, Clone)]
pub struct SignBeaconAttestationRequest {
    pub account: AccountRef,
    pub data: SignBeaconAttestationData,
}

#[derive(Debug, Clone)]
pub struct SignBeaconProposalRequest {
    pub account: AccountRef,
    pub data: SignBeaconProposalData,
}
