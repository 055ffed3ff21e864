//! HypeMap: ranked, paginated views over active co-streams
//!
//! Read-only. The engine opens its own `query_only` connection, so it can run
//! next to ingestion without taking write locks; it may observe data one
//! cycle behind.
//!
//! A row is *active* when `is_live = 1` or it was seen within the active
//! window (5 minutes by default). This window is separate from the sweeper's
//! grace period.
//!
//! `live` score: `viewers + 300 if verified + 100 if the creator's lang
//! equals the requested lang`, ordered by score desc then row id.
//! `summary` groups active rows per event, ordered by total viewers desc,
//! then most recent sighting, then slug.

use crate::clock::{self, Clock};
use crate::store::{apply_connection_pragmas, StoreError};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_LIVE_LIMIT: i64 = 50;
pub const DEFAULT_SUMMARY_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(5 * 60);

pub const VERIFIED_BONUS: i64 = 300;
pub const LANG_MATCH_BONUS: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct HypeMapQuery {
    /// Exact match on the event's game
    pub game: Option<String>,
    /// Exact match on the co-stream lang; also drives the lang bonus
    pub lang: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl HypeMapQuery {
    fn game(&self) -> Option<&str> {
        self.game.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    fn lang(&self) -> Option<&str> {
        self.lang.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// `limit <= 0` becomes `default`, anything above [`MAX_LIMIT`] becomes
/// `MAX_LIMIT`; negative offsets become 0.
pub fn clamp_page(limit: i64, offset: i64, default: i64) -> (i64, i64) {
    let limit = if limit <= 0 { default } else { limit.min(MAX_LIMIT) };
    (limit, offset.max(0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `offset + items.len()`. Fewer items than the limit means end of data.
    pub next_offset: i64,
}

impl<T> Page<T> {
    fn new(items: Vec<T>, offset: i64) -> Self {
        let next_offset = offset + items.len() as i64;
        Self { items, next_offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypeMapItem {
    pub event_slug: String,
    pub event_title: String,
    pub game: String,
    pub league: String,
    pub platform: String,
    pub handle: String,
    pub lang: String,
    pub country: String,
    pub viewers: i64,
    pub is_live: bool,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypeMapSummaryItem {
    pub event_slug: String,
    pub event_title: String,
    pub game: String,
    pub league: String,
    pub streamer_count: i64,
    pub total_viewers: i64,
    pub last_seen_at: i64,
}

const ACTIVE_ROWS: &str = "
    FROM co_streams cs
    JOIN events e ON e.id = cs.event_id
    JOIN creators c ON c.id = cs.creator_id
    WHERE (cs.is_live = 1 OR cs.last_seen_at >= ?1)
      AND (?2 IS NULL OR e.game = ?2)
      AND (?3 IS NULL OR cs.lang = ?3)";

pub struct HypeRankingEngine {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    active_window: Duration,
}

impl HypeRankingEngine {
    /// Open a read-only view of an already migrated database
    pub fn open(
        db_path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        active_window: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        apply_connection_pragmas(&conn)?;

        // Must come after the pragmas above
        conn.execute_batch("PRAGMA query_only = ON")?;

        let active_window = if active_window.is_zero() {
            DEFAULT_ACTIVE_WINDOW
        } else {
            active_window
        };

        log::info!("📖 HypeMap reader opened (active window: {}s)", active_window.as_secs());

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            active_window,
        })
    }

    fn active_cutoff(&self) -> i64 {
        clock::cutoff(self.clock.now(), self.active_window)
    }

    /// Active co-streams ranked by hype score
    pub fn live(&self, query: &HypeMapQuery) -> Result<Page<HypeMapItem>, StoreError> {
        let (limit, offset) = clamp_page(query.limit, query.offset, DEFAULT_LIVE_LIMIT);
        let cutoff = self.active_cutoff();

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT e.slug, e.title, e.game, COALESCE(e.league, ''),
                    cs.platform, c.handle, cs.lang, cs.country, cs.viewers, cs.is_live,
                    cs.viewers
                      + CASE WHEN cs.verified = 1 THEN {verified} ELSE 0 END
                      + CASE WHEN ?3 IS NOT NULL AND c.lang = ?3 THEN {lang} ELSE 0 END AS score
             {rows}
             ORDER BY score DESC, cs.id ASC
             LIMIT ?4 OFFSET ?5",
            verified = VERIFIED_BONUS,
            lang = LANG_MATCH_BONUS,
            rows = ACTIVE_ROWS
        ))?;

        let items = stmt
            .query_map(params![cutoff, query.game(), query.lang(), limit, offset], |row| {
                Ok(HypeMapItem {
                    event_slug: row.get(0)?,
                    event_title: row.get(1)?,
                    game: row.get(2)?,
                    league: row.get(3)?,
                    platform: row.get(4)?,
                    handle: row.get(5)?,
                    lang: row.get(6)?,
                    country: row.get(7)?,
                    viewers: row.get(8)?,
                    is_live: row.get(9)?,
                    score: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, offset))
    }

    /// Active co-streams aggregated per event
    pub fn summary(&self, query: &HypeMapQuery) -> Result<Page<HypeMapSummaryItem>, StoreError> {
        let (limit, offset) = clamp_page(query.limit, query.offset, DEFAULT_SUMMARY_LIMIT);
        let cutoff = self.active_cutoff();

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT e.slug, e.title, e.game, COALESCE(e.league, ''),
                    COUNT(*) AS streamer_count,
                    SUM(cs.viewers) AS total_viewers,
                    MAX(cs.last_seen_at) AS last_seen
             {rows}
             GROUP BY e.id
             ORDER BY total_viewers DESC, last_seen DESC, e.slug ASC
             LIMIT ?4 OFFSET ?5",
            rows = ACTIVE_ROWS
        ))?;

        let items = stmt
            .query_map(params![cutoff, query.game(), query.lang(), limit, offset], |row| {
                Ok(HypeMapSummaryItem {
                    event_slug: row.get(0)?,
                    event_title: row.get(1)?,
                    game: row.get(2)?,
                    league: row.get(3)?,
                    streamer_count: row.get(4)?,
                    total_viewers: row.get(5)?,
                    last_seen_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{CoStreamUpsert, EventRef};
    use crate::store::test_support::*;
    use crate::store::SqliteStore;

    fn upsert(slug: &str, game: &str, handle: &str, lang: &str, viewers: u32, verified: bool) -> CoStreamUpsert {
        CoStreamUpsert {
            event: EventRef {
                slug: slug.to_string(),
                title: slug.to_uppercase(),
                game: game.to_string(),
                league: String::new(),
                starts_at: None,
            },
            platform: "twitch".to_string(),
            handle: handle.to_string(),
            url: String::new(),
            lang: lang.to_string(),
            country: String::new(),
            verified,
            viewers,
            is_live: true,
        }
    }

    fn engine(temp: &tempfile::NamedTempFile, store: &SqliteStore) -> HypeRankingEngine {
        HypeRankingEngine::open(temp.path(), store.clock().clone(), DEFAULT_ACTIVE_WINDOW).unwrap()
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0, 0, 50), (50, 0));
        assert_eq!(clamp_page(-3, 0, 20), (20, 0));
        assert_eq!(clamp_page(500, 0, 50), (100, 0));
        assert_eq!(clamp_page(10, -5, 50), (10, 0));
        assert_eq!(clamp_page(100, 7, 50), (100, 7));
    }

    #[test]
    fn test_score_applies_fixed_bonuses() {
        let (temp, _clock, store) = create_test_store();
        store.upsert_co_stream(&upsert("a", "val", "big", "en", 1000, false)).unwrap();
        store.upsert_co_stream(&upsert("a", "val", "verified", "es", 800, true)).unwrap();
        store.upsert_co_stream(&upsert("a", "val", "small", "es", 100, false)).unwrap();

        let page = engine(&temp, &store)
            .live(&HypeMapQuery {
                game: Some("val".to_string()),
                ..Default::default()
            })
            .unwrap();

        let scores: Vec<_> = page.items.iter().map(|i| (i.handle.as_str(), i.score)).collect();
        assert_eq!(scores, vec![("verified", 1100), ("big", 1000), ("small", 100)]);
        assert_eq!(page.next_offset, 3);
    }

    #[test]
    fn test_lang_filter_and_bonus() {
        let (temp, _clock, store) = create_test_store();
        store.upsert_co_stream(&upsert("a", "val", "es1", "es", 50, false)).unwrap();
        store.upsert_co_stream(&upsert("a", "val", "en1", "en", 5000, false)).unwrap();

        let page = engine(&temp, &store)
            .live(&HypeMapQuery {
                lang: Some("es".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].handle, "es1");
        assert_eq!(page.items[0].score, 150);
    }

    #[test]
    fn test_ties_break_by_row_id() {
        let (temp, _clock, store) = create_test_store();
        for handle in ["first", "second", "third"] {
            store.upsert_co_stream(&upsert("a", "val", handle, "es", 10, false)).unwrap();
        }

        let engine = engine(&temp, &store);
        let query = HypeMapQuery {
            limit: 2,
            ..Default::default()
        };
        let first = engine.live(&query).unwrap();
        let again = engine.live(&query).unwrap();
        assert_eq!(first, again);

        let handles: Vec<_> = first.items.iter().map(|i| i.handle.as_str()).collect();
        assert_eq!(handles, vec!["first", "second"]);
        assert_eq!(first.next_offset, 2);

        let rest = engine
            .live(&HypeMapQuery {
                limit: 2,
                offset: first.next_offset,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].handle, "third");
        assert_eq!(rest.next_offset, 3);
    }

    #[test]
    fn test_recently_seen_offline_row_is_active() {
        let (temp, clock, store) = create_test_store();
        let mut offline = upsert("a", "val", "recent", "es", 10, false);
        offline.is_live = false;
        store.upsert_co_stream(&offline).unwrap();
        let mut old = upsert("a", "val", "old", "es", 10, false);
        old.is_live = false;
        store.upsert_co_stream(&old).unwrap();

        let engine = engine(&temp, &store);

        clock.advance(4 * 60);
        assert_eq!(engine.live(&HypeMapQuery::default()).unwrap().items.len(), 2);

        clock.advance(2 * 60);
        assert!(engine.live(&HypeMapQuery::default()).unwrap().items.is_empty());
    }

    #[test]
    fn test_summary_groups_per_event() {
        let (temp, clock, store) = create_test_store();
        store.upsert_co_stream(&upsert("kings", "val", "a", "es", 100, false)).unwrap();
        clock.advance(10);
        store.upsert_co_stream(&upsert("kings", "val", "b", "es", 200, true)).unwrap();
        store.upsert_co_stream(&upsert("masters", "val", "c", "en", 300, false)).unwrap();
        store.upsert_co_stream(&upsert("worlds", "lol", "d", "en", 900, false)).unwrap();

        let page = engine(&temp, &store)
            .summary(&HypeMapQuery {
                game: Some("val".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(page.items.len(), 2);
        // Equal totals: most recent first, then slug
        assert_eq!(page.items[0].event_slug, "kings");
        assert_eq!(page.items[0].streamer_count, 2);
        assert_eq!(page.items[0].total_viewers, 300);
        assert_eq!(page.items[0].last_seen_at, T0 + 10);
        assert_eq!(page.items[1].event_slug, "masters");
    }

    #[test]
    fn test_empty_store_is_empty_page() {
        let (temp, _clock, store) = create_test_store();
        let engine = engine(&temp, &store);

        let page = engine
            .live(&HypeMapQuery {
                offset: -5,
                ..Default::default()
            })
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_offset, 0);

        assert!(engine.summary(&HypeMapQuery::default()).unwrap().items.is_empty());
    }

    #[test]
    fn test_reader_cannot_write() {
        let (temp, _clock, store) = create_test_store();
        let engine = engine(&temp, &store);

        let conn = engine.conn.lock().unwrap();
        assert!(conn.execute("DELETE FROM co_streams", []).is_err());
    }
}
