//! Core records flowing through the ingestion pipeline

use serde::{Deserialize, Serialize};

/// One provider observation of a creator, in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSignal {
    pub platform: String,
    /// Lowercase
    pub handle: String,
    pub viewers: u32,
    pub is_live: bool,
    /// Empty when the provider did not say
    pub lang: String,
    /// Unix seconds
    pub started_at: Option<i64>,
}

/// Event identity and labels carried by an upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub slug: String,
    pub title: String,
    pub game: String,
    /// Empty keeps whatever league the event already has
    pub league: String,
    /// Only used when the event row is created; defaults to now
    pub starts_at: Option<i64>,
}

/// Everything needed to merge one creator/event observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoStreamUpsert {
    pub event: EventRef,
    pub platform: String,
    pub handle: String,
    pub url: String,
    pub lang: String,
    pub country: String,
    pub verified: bool,
    pub viewers: u32,
    pub is_live: bool,
}

/// A team composition sample. `slots` is raw JSON text; it is canonicalized
/// and fingerprinted before it reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionUpsert {
    pub game: String,
    pub region: String,
    #[serde(default)]
    pub league: String,
    pub patch: String,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub side: String,
    pub slots: String,
    #[serde(default)]
    pub pick_rate: Option<f64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub delta_win: Option<f64>,
}
