//! Rule verdicts, request metadata and per-operation rule data

use crate::protection::PubKey;
use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte root or domain
pub type Root = [u8; 32];

/// Passphrase carried by unlock and create requests
pub type Passphrase = Secret<Vec<u8>>;

pub fn new_passphrase(bytes: impl Into<Vec<u8>>) -> Passphrase {
    Secret::new(bytes.into())
}

/// Verdict of a rule provider.
///
/// Ordered by severity: `Denied` outranks `Approved`, which outranks an
/// abstaining `Unknown`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleResult {
    #[default]
    Unknown,
    Approved,
    Denied,
}

impl RuleResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, RuleResult::Approved)
    }

    /// Combine with another verdict, keeping the more severe one
    pub fn combine(self, other: RuleResult) -> RuleResult {
        self.max(other)
    }

    /// Final decision for a combined verdict: nothing short of an approval
    /// is allowed through.
    pub fn resolve(self) -> RuleResult {
        match self {
            RuleResult::Approved => RuleResult::Approved,
            RuleResult::Unknown | RuleResult::Denied => RuleResult::Denied,
        }
    }
}

impl fmt::Display for RuleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleResult::Unknown => "UNKNOWN",
            RuleResult::Approved => "APPROVED",
            RuleResult::Denied => "DENIED",
        };
        f.write_str(s)
    }
}

/// The operation kinds rule providers decide on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateAccount,
    ListAccounts,
    LockAccount,
    LockWallet,
    UnlockAccount,
    UnlockWallet,
    Sign,
    SignBeaconAttestation,
    SignBeaconAttestations,
    SignBeaconProposal,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateAccount => "create_account",
            OperationKind::ListAccounts => "list_accounts",
            OperationKind::LockAccount => "lock_account",
            OperationKind::LockWallet => "lock_wallet",
            OperationKind::UnlockAccount => "unlock_account",
            OperationKind::UnlockWallet => "unlock_wallet",
            OperationKind::Sign => "sign",
            OperationKind::SignBeaconAttestation => "sign_beacon_attestation",
            OperationKind::SignBeaconAttestations => "sign_beacon_attestations",
            OperationKind::SignBeaconProposal => "sign_beacon_proposal",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a single inbound request
#[derive(Debug, Clone)]
pub struct ReqMetadata {
    /// Client the credentials identify
    pub client: String,
    /// Account (or wallet) name the request targets
    pub account: String,
    /// Public key of the account, if known
    pub pubkey: Option<PubKey>,
    /// Remote address of the caller
    pub ip: Option<String>,
    /// Request ID for audit
    pub request_id: String,
    /// When the request was received
    pub received_at: DateTime<Utc>,
}

impl ReqMetadata {
    pub fn new(client: &str, account: &str, request_id: &str) -> Self {
        Self {
            client: client.to_string(),
            account: account.to_string(),
            pubkey: None,
            ip: None,
            request_id: request_id.to_string(),
            received_at: Utc::now(),
        }
    }

    pub fn with_pubkey(mut self, pubkey: PubKey) -> Self {
        self.pubkey = Some(pubkey);
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountData {
    pub wallet: String,
    pub account: String,
}

/// Data for deciding whether an account may be listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessAccountData {
    pub wallet: String,
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAccountData {
    pub wallet: String,
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWalletData {
    pub wallet: String,
}

pub struct UnlockAccountData {
    pub wallet: String,
    pub account: String,
    pub passphrase: Passphrase,
}

impl fmt::Debug for UnlockAccountData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockAccountData")
            .field("wallet", &self.wallet)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

pub struct UnlockWalletData {
    pub wallet: String,
    pub passphrase: Passphrase,
}

impl fmt::Debug for UnlockWalletData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockWalletData")
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

/// Generic data signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignData {
    pub domain: Root,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    pub epoch: u64,
    pub root: Root,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignBeaconAttestationData {
    pub domain: Root,
    pub slot: u64,
    pub committee_index: u64,
    pub beacon_block_root: Root,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignBeaconProposalData {
    pub domain: Root,
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: Root,
    pub state_root: Root,
    pub body_root: Root,
}

/// Borrowed operation data, one variant per single-request operation kind
#[derive(Debug, Clone, Copy)]
pub enum OperationData<'a> {
    CreateAccount(&'a CreateAccountData),
    ListAccounts(&'a AccessAccountData),
    LockAccount(&'a LockAccountData),
    LockWallet(&'a LockWalletData),
    UnlockAccount(&'a UnlockAccountData),
    UnlockWallet(&'a UnlockWalletData),
    Sign(&'a SignData),
    SignBeaconAttestation(&'a SignBeaconAttestationData),
    SignBeaconProposal(&'a SignBeaconProposalData),
}

impl OperationData<'_> {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationData::CreateAccount(_) => OperationKind::CreateAccount,
            OperationData::ListAccounts(_) => OperationKind::ListAccounts,
            OperationData::LockAccount(_) => OperationKind::LockAccount,
            OperationData::LockWallet(_) => OperationKind::LockWallet,
            OperationData::UnlockAccount(_) => OperationKind::UnlockAccount,
            OperationData::UnlockWallet(_) => OperationKind::UnlockWallet,
            OperationData::Sign(_) => OperationKind::Sign,
            OperationData::SignBeaconAttestation(_) => OperationKind::SignBeaconAttestation,
            OperationData::SignBeaconProposal(_) => OperationKind::SignBeaconProposal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(RuleResult::Denied > RuleResult::Approved);
        assert!(RuleResult::Approved > RuleResult::Unknown);
        assert_eq!(
            RuleResult::Approved.combine(RuleResult::Denied),
            RuleResult::Denied
        );
        assert_eq!(
            RuleResult::Unknown.combine(RuleResult::Approved),
            RuleResult::Approved
        );
    }

    #[test]
    fn test_resolve_fails_closed() {
        assert_eq!(RuleResult::Unknown.resolve(), RuleResult::Denied);
        assert_eq!(RuleResult::Approved.resolve(), RuleResult::Approved);
        assert_eq!(RuleResult::Denied.resolve(), RuleResult::Denied);
    }

    #[test]
    fn test_unlock_data_debug_hides_passphrase() {
        let data = UnlockWalletData {
            wallet: "Wallet1".to_string(),
            passphrase: new_passphrase("hunter2"),
        };
        let printed = format!("{:?}", data);
        assert!(printed.contains("Wallet1"));
        assert!(!printed.contains("hunter2"));
    }
}
