//! Multi-tenant order broadcasting for Indian F&O brokers.
//!
//! An admin issues one order intent; the orchestrator sizes it per user by
//! lot multiplier, places it through each user's broker (Zerodha or Dhan),
//! and records fills in a per-user position ledger. Broker access tokens are
//! held encrypted and kept alive by a background refresh sweep.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod scheduler;
pub mod security;
