//! # Live-signal ingestion pipeline
//!
//! Turns provider observations into rows of the event / creator / co-stream
//! graph, one cycle at a time:
//!
//! ```text
//! scheduler tick
//!   └─ IngestionCycle::run_once
//!        ├─ tracked creators ──► chunk ──► StreamProvider::fetch_live (rate limited)
//!        ├─ normalize ──► EventResolver::resolve ──► IngestStore::write_co_stream
//!        ├─ CompositionFeed::drain ──► IngestStore::write_composition
//!        └─ StalenessSweeper::run
//! ```
//!
//! The ranking engine reads the same database independently and never
//! writes to it.
//!
//! ## Module Organization
//!
//! - `types` - LiveSignal and the upsert records
//! - `normalizer` - provider payload → LiveSignal (pure)
//! - `resolver` - rule / window / fallback event resolution (pure)
//! - `sweeper` - time-decay of liveness
//! - `comps_feed` - JSONL composition samples
//! - `ingestion` - one full cycle
//! - `scheduler` - periodic, non-overlapping cycle driver

pub mod comps_feed;
pub mod ingestion;
pub mod normalizer;
pub mod resolver;
pub mod scheduler;
pub mod sweeper;
pub mod types;

pub use comps_feed::{CompositionFeed, FeedBatch, JsonlCompositionFeed};
pub use ingestion::{CycleReport, IngestionCycle, IngestionSettings};
pub use normalizer::normalize;
pub use resolver::{EventMapping, EventResolver, EventWindow, KnownEvent, ResolvedEvent, Resolution, StreamRule};
pub use scheduler::{run_scheduler, CycleRunner};
pub use sweeper::StalenessSweeper;
pub use types::{CoStreamUpsert, CompositionUpsert, EventRef, LiveSignal};
