//! Time window rules
//!
//! Deny every operation outside a daily UTC window and abstain inside it.

use crate::errors::{Result, SlashGuardError};
use crate::rules::types::*;
use crate::rules::RulesService;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Daily window during which operations may proceed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowRule {
    /// Rule ID
    pub id: String,
    /// Start hour (0-23 UTC)
    pub start_hour: u8,
    /// Start minute (0-59)
    pub start_minute: u8,
    /// End hour (0-23 UTC)
    pub end_hour: u8,
    /// End minute (0-59)
    pub end_minute: u8,
    /// Days of week (0=Sunday, 6=Saturday). Empty = all days
    #[serde(default)]
    pub days: Vec<u8>,
}

impl TimeWindowRule {
    pub fn new(id: &str, start_hour: u8, start_minute: u8, end_hour: u8, end_minute: u8) -> Self {
        Self {
            id: id.to_string(),
            start_hour,
            start_minute,
            end_hour,
            end_minute,
            days: vec![],
        }
    }

    pub fn with_days(mut self, days: Vec<u8>) -> Self {
        self.days = days;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(SlashGuardError::ConfigError(format!(
                "time window {}: hours must be 0-23",
                self.id
            )));
        }
        if self.start_minute > 59 || self.end_minute > 59 {
            return Err(SlashGuardError::ConfigError(format!(
                "time window {}: minutes must be 0-59",
                self.id
            )));
        }
        if self.days.iter().any(|d| *d > 6) {
            return Err(SlashGuardError::ConfigError(format!(
                "time window {}: days must be 0-6",
                self.id
            )));
        }
        Ok(())
    }

    /// Check if a moment is within the allowed window
    pub fn is_allowed_at(&self, now: DateTime<Utc>) -> bool {
        let current_minutes = now.hour() * 60 + now.minute();
        let start_minutes = self.start_hour as u32 * 60 + self.start_minute as u32;
        let end_minutes = self.end_hour as u32 * 60 + self.end_minute as u32;

        if !self.days.is_empty() {
            let weekday = now.weekday().num_days_from_sunday() as u8;
            if !self.days.contains(&weekday) {
                return false;
            }
        }

        if start_minutes <= end_minutes {
            current_minutes >= start_minutes && current_minutes < end_minutes
        } else {
            // Window spans midnight
            current_minutes >= start_minutes || current_minutes < end_minutes
        }
    }
}

/// Provider wrapping a [`TimeWindowRule`]
pub struct TimeWindowRules {
    window: TimeWindowRule,
    clock: fn() -> DateTime<Utc>,
}

impl TimeWindowRules {
    pub fn new(window: TimeWindowRule) -> Self {
        Self {
            window,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn verdict(&self, meta: &ReqMetadata) -> Result<RuleResult> {
        if self.window.is_allowed_at((self.clock)()) {
            Ok(RuleResult::Unknown)
        } else {
            debug!(
                "Request {} outside time window (rule: {})",
                meta.request_id, self.window.id
            );
            Ok(RuleResult::Denied)
        }
    }
}

impl RulesService for TimeWindowRules {
    fn name(&self) -> &str {
        "time_window"
    }

    fn on_create_account(&self, meta: &ReqMetadata, _: &CreateAccountData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_list_accounts(&self, meta: &ReqMetadata, _: &AccessAccountData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_lock_account(&self, meta: &ReqMetadata, _: &LockAccountData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_lock_wallet(&self, meta: &ReqMetadata, _: &LockWalletData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_unlock_account(&self, meta: &ReqMetadata, _: &UnlockAccountData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_unlock_wallet(&self, meta: &ReqMetadata, _: &UnlockWalletData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_sign(&self, meta: &ReqMetadata, _: &SignData) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_sign_beacon_attestation(
        &self,
        meta: &ReqMetadata,
        _: &SignBeaconAttestationData,
    ) -> Result<RuleResult> {
        self.verdict(meta)
    }

    fn on_sign_beacon_proposal(
        &self,
        meta: &ReqMetadata,
        _: &SignBeaconProposalData,
    ) -> Result<RuleResult> {
        self.verdict(meta)
    }
}
