//! # HypeAtlas
//!
//! Ingests live-broadcast signals from streaming providers, merges them into
//! an event / creator / co-stream graph in SQLite, and serves ranked
//! "who is hyping what, right now" views over it.
//!
//! ## Module Organization
//!
//! - `provider` - rate-limited provider clients (Twitch Helix)
//! - `pipeline` - normalize, resolve, upsert, sweep; the cycle scheduler
//! - `store` - SQLite schema, upserts and composition fingerprints
//! - `ranking` - HypeMap live and summary reads
//! - `config`, `clock`, `shutdown`, `canonical` - shared plumbing

pub mod canonical;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod provider;
pub mod ranking;
pub mod shutdown;
pub mod store;
