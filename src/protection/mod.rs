//! Slashing protection
//!
//! This module provides:
//! - Per-key protection records and the monotonicity checks over them
//! - A reservation-based store with optional file durability

pub mod record;
pub mod store;

pub use record::{
    merge_maps, Conflict, ProtectionMap, PubKey, SlashingProtection, PUBKEY_LENGTH,
};
pub use store::{ProtectionStore, Reservation, SlashingProtectionStore};
