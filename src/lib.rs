//! tidekv - a versioned, TTL-aware key-value database
//!
//! Namespaced keys map to versioned records with optional expiry, stored
//! in an embedded LSM-tree. Every write bumps a per-key version that
//! survives deletion; conditional writes and batches commit atomically;
//! expired records are never returned and are removed both lazily on read
//! and eagerly by a background sweeper.
//!
//! Layers, top to bottom:
//!
//! - `http_server` / `cli`: outer surfaces
//! - `kv`: the versioned record store
//! - `sweeper`: periodic expiry removal through [`sweeper::ExpirySource`]
//! - `codec`: physical key layout and record envelope
//! - `storage`: the embedded engine adapter

pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod database;
pub mod http_server;
pub mod kv;
pub mod observability;
pub mod storage;
pub mod sweeper;

pub use database::{Database, DatabaseError};
