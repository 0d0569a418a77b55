//! Request processing
//!
//! This module provides:
//! - The request orchestrator (`Processor`) and its builder
//! - Per-key exclusive sections
//! - Reservation tracking that rolls back abandoned requests

pub mod locks;
pub mod requests;
pub mod reservation;
pub mod service;

pub use locks::{KeyGuard, KeyLocks};
pub use requests::*;
pub use reservation::ReservationGuard;
pub use service::{Processor, ProcessorBuilder};
