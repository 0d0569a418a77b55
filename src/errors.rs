//! Error types for slashguard

use thiserror::Error;

/// Main error type for slashguard operations
#[derive(Error, Debug)]
pub enum SlashGuardError {
    // Access errors
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    // Decision errors
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("Slashing protection violation: {0}")]
    ConsistencyViolation(String),

    #[error("Rule provider fault: {0}")]
    ProviderFault(String),

    // Execution errors
    #[error("Action failed: {0}")]
    ActionFault(String),

    #[error("Import rejected: {0}")]
    ImportFault(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// The classes every failure is resolved into before it reaches a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PolicyDenied,
    ConsistencyViolation,
    ProviderFault,
    ActionFault,
    ImportFault,
}

impl SlashGuardError {
    /// Classify this error. Anything that is not clearly a denial or a rule
    /// fault is treated as a failed action.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlashGuardError::AccessDenied(_)
            | SlashGuardError::AccountNotFound(_)
            | SlashGuardError::WalletNotFound(_)
            | SlashGuardError::PolicyDenied(_)
            | SlashGuardError::InvalidRequest(_) => ErrorKind::PolicyDenied,
            SlashGuardError::ConsistencyViolation(_) => ErrorKind::ConsistencyViolation,
            SlashGuardError::ProviderFault(_) => ErrorKind::ProviderFault,
            SlashGuardError::ImportFault(_) => ErrorKind::ImportFault,
            SlashGuardError::ActionFault(_)
            | SlashGuardError::StorageError(_)
            | SlashGuardError::ConfigError(_)
            | SlashGuardError::InternalError(_) => ErrorKind::ActionFault,
        }
    }

    /// True for outcomes a caller should read as "no", as opposed to "broken".
    pub fn is_denial(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PolicyDenied | ErrorKind::ConsistencyViolation
        )
    }
}

impl From<std::io::Error> for SlashGuardError {
    fn from(err: std::io::Error) -> Self {
        SlashGuardError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for SlashGuardError {
    fn from(err: serde_json::Error) -> Self {
        SlashGuardError::StorageError(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for SlashGuardError {
    fn from(err: hex::FromHexError) -> Self {
        SlashGuardError::InvalidRequest(format!("Hex decode error: {}", err))
    }
}

/// Convert SlashGuardError to tonic::Status for gRPC responses
impl From<SlashGuardError> for tonic::Status {
    fn from(err: SlashGuardError) -> Self {
        match err {
            SlashGuardError::AccessDenied(_) => tonic::Status::unauthenticated(err.to_string()),
            SlashGuardError::AccountNotFound(_) | SlashGuardError::WalletNotFound(_) => {
                tonic::Status::not_found(err.to_string())
            }
            SlashGuardError::PolicyDenied(_) | SlashGuardError::ConsistencyViolation(_) => {
                tonic::Status::permission_denied(err.to_string())
            }
            SlashGuardError::InvalidRequest(_) | SlashGuardError::ImportFault(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SlashGuardError>;
