//! Team compositions, deduplicated by a fingerprint of their slots
//!
//! The slots payload must be a JSON object. It is canonicalized (sorted
//! keys, compact) and hashed with SHA-256 before the write, so reordered
//! keys or whitespace land on the same row. On conflict only the rates and
//! `updated_at` change.

use super::{write_error, SqliteStore, StoreError};
use crate::canonical::{canonical_string, sha256_hex};
use crate::pipeline::types::CompositionUpsert;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_COMPS_LIMIT: i64 = 50;
pub const MAX_COMPS_LIMIT: i64 = 200;

const UPSERT_COMPOSITION_SQL: &str = "
    INSERT INTO comps (
        game, region, league, patch, map, side, slots, slots_fp,
        pick_rate, win_rate, delta_win, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
    ON CONFLICT(game, region, league, patch, map, side, slots_fp) DO UPDATE SET
        pick_rate = excluded.pick_rate,
        win_rate = excluded.win_rate,
        delta_win = excluded.delta_win,
        updated_at = excluded.updated_at";

/// Canonical slots text and its fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotsFingerprint {
    pub canonical: String,
    pub fingerprint: String,
}

pub fn fingerprint_slots(raw: &str) -> Result<SlotsFingerprint, StoreError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| StoreError::InvalidCompositionPayload(format!("slots is not valid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(StoreError::InvalidCompositionPayload(
            "slots must be a JSON object".to_string(),
        ));
    }

    let canonical =
        canonical_string(value).map_err(|e| StoreError::InvalidCompositionPayload(e.to_string()))?;
    let fingerprint = sha256_hex(canonical.as_bytes());

    Ok(SlotsFingerprint { canonical, fingerprint })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composition {
    pub id: i64,
    pub game: String,
    pub region: String,
    pub league: String,
    pub patch: String,
    pub map: String,
    pub side: String,
    /// Canonical JSON text
    pub slots: String,
    pub slots_fp: String,
    pub pick_rate: Option<f64>,
    pub win_rate: Option<f64>,
    pub delta_win: Option<f64>,
    pub updated_at: i64,
}

/// Filters for [`SqliteStore::list_compositions`]. `game`, `region` and
/// `patch` are required; the rest are exact-match when set.
#[derive(Debug, Clone, Default)]
pub struct CompositionQuery {
    pub game: String,
    pub region: String,
    pub patch: String,
    pub league: Option<String>,
    pub map: Option<String>,
    pub side: Option<String>,
    pub limit: i64,
}

impl CompositionQuery {
    fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            DEFAULT_COMPS_LIMIT
        } else {
            self.limit.min(MAX_COMPS_LIMIT)
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn optional_filter(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SqliteStore {
    pub fn upsert_composition(&self, comp: &CompositionUpsert) -> Result<(), StoreError> {
        require("game", &comp.game)?;
        require("region", &comp.region)?;
        require("patch", &comp.patch)?;

        let slots = fingerprint_slots(&comp.slots)?;
        let now = self.now();

        let conn = self.lock();
        conn.execute(
            UPSERT_COMPOSITION_SQL,
            params![
                comp.game.trim(),
                comp.region.trim(),
                comp.league.trim(),
                comp.patch.trim(),
                comp.map.trim(),
                comp.side.trim(),
                slots.canonical,
                slots.fingerprint,
                comp.pick_rate,
                comp.win_rate,
                comp.delta_win,
                now,
            ],
        )
        .map_err(write_error(format!(
            "composition {}/{}/{}/{} fp={}",
            comp.game, comp.region, comp.league, comp.patch, slots.fingerprint
        )))?;

        Ok(())
    }

    /// Best win rate first, then pick rate; rows without rates sort last
    pub fn list_compositions(&self, query: &CompositionQuery) -> Result<Vec<Composition>, StoreError> {
        require("game", &query.game)?;
        require("region", &query.region)?;
        require("patch", &query.patch)?;

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, game, region, league, patch, map, side, slots, slots_fp,
                    pick_rate, win_rate, delta_win, updated_at
             FROM comps
             WHERE game = ?1 AND region = ?2 AND patch = ?3
               AND (?4 IS NULL OR league = ?4)
               AND (?5 IS NULL OR map = ?5)
               AND (?6 IS NULL OR side = ?6)
             ORDER BY win_rate DESC NULLS LAST, pick_rate DESC NULLS LAST, id
             LIMIT ?7",
        )?;

        let comps = stmt
            .query_map(
                params![
                    query.game.trim(),
                    query.region.trim(),
                    query.patch.trim(),
                    optional_filter(&query.league),
                    optional_filter(&query.map),
                    optional_filter(&query.side),
                    query.effective_limit(),
                ],
                |row| {
                    Ok(Composition {
                        id: row.get(0)?,
                        game: row.get(1)?,
                        region: row.get(2)?,
                        league: row.get(3)?,
                        patch: row.get(4)?,
                        map: row.get(5)?,
                        side: row.get(6)?,
                        slots: row.get(7)?,
                        slots_fp: row.get(8)?,
                        pick_rate: row.get(9)?,
                        win_rate: row.get(10)?,
                        delta_win: row.get(11)?,
                        updated_at: row.get(12)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(comps)
    }
}
