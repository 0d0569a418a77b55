//! Slashing protection records
//!
//! A record holds the highest attested (source, target) epoch pair and the
//! highest proposed slot seen for one validator public key.

use crate::errors::{Result, SlashGuardError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a BLS validator public key
pub const PUBKEY_LENGTH: usize = 48;

/// A 48-byte validator public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey([u8; PUBKEY_LENGTH]);

impl PubKey {
    pub fn new(bytes: [u8; PUBKEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; PUBKEY_LENGTH] = bytes.try_into().map_err(|_| {
            SlashGuardError::InvalidRequest(format!(
                "Expected {} byte public key, got {}",
                PUBKEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_LENGTH] {
        &self.0
    }

    /// 0x-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for PubKey {
    type Err = SlashGuardError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.to_hex())
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reasons a signing candidate would break the protection invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("attestation source epoch {source_epoch} is after target epoch {target}")]
    SourceAfterTarget { source_epoch: u64, target: u64 },

    #[error("attestation source epoch {requested} is below recorded source epoch {recorded}")]
    SourceRegression { requested: u64, recorded: u64 },

    #[error("attestation target epoch {requested} is not above recorded target epoch {recorded}")]
    TargetNotIncreasing { requested: u64, recorded: u64 },

    #[error("proposal slot {requested} is not above recorded slot {recorded}")]
    SlotNotIncreasing { requested: u64, recorded: u64 },
}

/// Slashing protection state for a single key.
///
/// Used both as the stored record and as a signing candidate, in which case
/// only the fields relevant to the operation are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingProtection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_attesting_source_epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_attesting_target_epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_proposed_slot: Option<u64>,
}

impl SlashingProtection {
    /// Candidate for signing an attestation
    pub fn attestation(source_epoch: u64, target_epoch: u64) -> Self {
        Self {
            highest_attesting_source_epoch: Some(source_epoch),
            highest_attesting_target_epoch: Some(target_epoch),
            highest_proposed_slot: None,
        }
    }

    /// Candidate for signing a block proposal
    pub fn proposal(slot: u64) -> Self {
        Self {
            highest_attesting_source_epoch: None,
            highest_attesting_target_epoch: None,
            highest_proposed_slot: Some(slot),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.highest_attesting_source_epoch.is_none()
            && self.highest_attesting_target_epoch.is_none()
            && self.highest_proposed_slot.is_none()
    }

    /// Structural validity: source and target come as a pair, and source
    /// never exceeds target.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match (
            self.highest_attesting_source_epoch,
            self.highest_attesting_target_epoch,
        ) {
            (Some(source), Some(target)) if source > target => Err(format!(
                "source epoch {} is after target epoch {}",
                source, target
            )),
            (Some(_), None) => Err("source epoch without target epoch".to_string()),
            (None, Some(_)) => Err("target epoch without source epoch".to_string()),
            _ => Ok(()),
        }
    }

    /// Check a candidate against this record.
    pub fn check(&self, candidate: &SlashingProtection) -> std::result::Result<(), Conflict> {
        if let (Some(source), Some(target)) = (
            candidate.highest_attesting_source_epoch,
            candidate.highest_attesting_target_epoch,
        ) {
            if source > target {
                return Err(Conflict::SourceAfterTarget {
                    source_epoch: source,
                    target,
                });
            }
            if let Some(recorded) = self.highest_attesting_source_epoch {
                if source < recorded {
                    return Err(Conflict::SourceRegression {
                        requested: source,
                        recorded,
                    });
                }
            }
            if let Some(recorded) = self.highest_attesting_target_epoch {
                if target <= recorded {
                    return Err(Conflict::TargetNotIncreasing {
                        requested: target,
                        recorded,
                    });
                }
            }
        }

        if let (Some(slot), Some(recorded)) =
            (candidate.highest_proposed_slot, self.highest_proposed_slot)
        {
            if slot <= recorded {
                return Err(Conflict::SlotNotIncreasing {
                    requested: slot,
                    recorded,
                });
            }
        }

        Ok(())
    }

    /// Field-wise maximum of two records.
    pub fn merge_max(&self, other: &SlashingProtection) -> SlashingProtection {
        SlashingProtection {
            highest_attesting_source_epoch: max_opt(
                self.highest_attesting_source_epoch,
                other.highest_attesting_source_epoch,
            ),
            highest_attesting_target_epoch: max_opt(
                self.highest_attesting_target_epoch,
                other.highest_attesting_target_epoch,
            ),
            highest_proposed_slot: max_opt(self.highest_proposed_slot, other.highest_proposed_slot),
        }
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Full key to record mapping used for export and import
pub type ProtectionMap = BTreeMap<PubKey, SlashingProtection>;

/// Merge `incoming` into `base`, keeping the higher value per field.
pub fn merge_maps(base: &mut ProtectionMap, incoming: &ProtectionMap) {
    for (key, record) in incoming {
        let merged = match base.get(key) {
            Some(existing) => existing.merge_max(record),
            None => *record,
        };
        base.insert(*key, merged);
    }
}
