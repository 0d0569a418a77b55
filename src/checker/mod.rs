//! Credential checking
//!
//! Provides:
//! - Caller credentials, extracted from gRPC request metadata
//! - The access check consulted before any rule runs
//! - A static, configuration-driven checker

use crate::errors::{Result, SlashGuardError};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tonic::Request;
use tracing::debug;

/// Actions a client may be permitted to attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Access,
    CreateAccount,
    LockAccount,
    UnlockAccount,
    LockWallet,
    UnlockWallet,
    Sign,
    SignBeaconAttestation,
    SignBeaconProposal,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Access => "Access",
            Action::CreateAccount => "CreateAccount",
            Action::LockAccount => "LockAccount",
            Action::UnlockAccount => "UnlockAccount",
            Action::LockWallet => "LockWallet",
            Action::UnlockWallet => "UnlockWallet",
            Action::Sign => "Sign",
            Action::SignBeaconAttestation => "SignBeaconAttestation",
            Action::SignBeaconProposal => "SignBeaconProposal",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client: String,
    pub ip: Option<String>,
    pub request_id: String,
}

impl Credentials {
    pub fn new(client: &str) -> Self {
        Self {
            client: client.to_string(),
            ip: None,
            request_id: generate_request_id(),
        }
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = request_id.to_string();
        self
    }

    /// Extract credentials from gRPC request metadata
    pub fn from_request<T>(request: &Request<T>) -> Result<Self> {
        let auth_header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok());

        let client = match auth_header {
            Some(header) if header.starts_with("Bearer ") => &header[7..],
            Some(header) if header.starts_with("ApiKey ") => &header[7..],
            Some(client) => client,
            None => {
                return Err(SlashGuardError::AccessDenied(
                    "Missing authorization header".to_string(),
                ))
            }
        };
        if client.trim().is_empty() {
            return Err(SlashGuardError::AccessDenied(
                "Empty client credentials".to_string(),
            ));
        }

        let request_id = request
            .metadata()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);

        Ok(Self {
            client: client.trim().to_string(),
            ip: request.remote_addr().map(|addr| addr.ip().to_string()),
            request_id,
        })
    }
}

fn generate_request_id() -> String {
    let now = Utc::now();
    format!(
        "req-{}-{}",
        now.timestamp(),
        now.timestamp_subsec_nanos()
    )
}

/// Decides whether a client may attempt an action on an account.
///
/// Implementations hold no per-request state and need no locking.
pub trait Checker: Send + Sync {
    /// `account` is `wallet/account`, or the bare wallet name for wallet
    /// operations.
    fn check(&self, credentials: &Credentials, account: &str, action: Action) -> bool;
}

/// Permission entry for a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPermissions {
    /// Client name as carried in credentials
    pub client: String,
    /// Account patterns and the actions allowed on them
    pub rules: Vec<PermissionRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Regular expression over `wallet/account` (or wallet) names
    pub accounts: String,
    /// Action names, or "*" for any
    pub actions: Vec<String>,
}

struct CompiledRule {
    accounts: Regex,
    actions: Vec<String>,
}

impl CompiledRule {
    fn permits(&self, account: &str, action: Action) -> bool {
        self.accounts.is_match(account)
            && self
                .actions
                .iter()
                .any(|a| a == "*" || a.eq_ignore_ascii_case(action.as_str()))
    }
}

/// Checker backed by a fixed permission table
pub struct StaticChecker {
    permissions: HashMap<String, Vec<CompiledRule>>,
}

impl StaticChecker {
    pub fn new(entries: &[ClientPermissions]) -> Result<Self> {
        let mut permissions: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        for entry in entries {
            for rule in &entry.rules {
                let accounts = Regex::new(&format!("^(?:{})$", rule.accounts)).map_err(|e| {
                    SlashGuardError::ConfigError(format!(
                        "Invalid account pattern {} for client {}: {}",
                        rule.accounts, entry.client, e
                    ))
                })?;
                permissions
                    .entry(entry.client.clone())
                    .or_default()
                    .push(CompiledRule {
                        accounts,
                        actions: rule.actions.clone(),
                    });
            }
        }
        Ok(Self { permissions })
    }

    /// Number of clients with at least one permission rule
    pub fn client_count(&self) -> usize {
        self.permissions.len()
    }
}

impl Checker for StaticChecker {
    fn check(&self, credentials: &Credentials, account: &str, action: Action) -> bool {
        let allowed = self
            .permissions
            .get(&credentials.client)
            .is_some_and(|rules| rules.iter().any(|r| r.permits(account, action)));
        if !allowed {
            debug!(
                "Client {} may not {} on {}",
                credentials.client, action, account
            );
        }
        allowed
    }
}
