//! Event / creator / co-stream merge and liveness bookkeeping

use super::{write_error, SqliteStore, StoreError};
use crate::clock;
use crate::pipeline::types::CoStreamUpsert;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;

const UPSERT_EVENT_SQL: &str = "
    INSERT INTO events (slug, title, game, league, starts_at, ends_at, created_at, updated_at)
    VALUES (?1, ?2, ?3, NULLIF(?4, ''), ?5, NULL, ?6, ?6)
    ON CONFLICT(slug) DO UPDATE SET
        title = excluded.title,
        league = COALESCE(excluded.league, events.league),
        updated_at = excluded.updated_at
    RETURNING id";

const UPSERT_CREATOR_SQL: &str = "
    INSERT INTO creators (platform, handle, url, lang, country, verified, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
    ON CONFLICT(platform, handle) DO UPDATE SET
        url = excluded.url,
        lang = excluded.lang,
        country = excluded.country,
        verified = excluded.verified,
        updated_at = excluded.updated_at
    RETURNING id";

// last_seen_at never moves backwards, even if a slower cycle commits late
const UPSERT_CO_STREAM_SQL: &str = "
    INSERT INTO co_streams (
        event_id, creator_id, platform, url, lang, country,
        viewers, verified, is_live, last_seen_at, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10)
    ON CONFLICT(event_id, creator_id) DO UPDATE SET
        platform = excluded.platform,
        url = excluded.url,
        lang = excluded.lang,
        country = excluded.country,
        viewers = excluded.viewers,
        verified = excluded.verified,
        is_live = excluded.is_live,
        last_seen_at = MAX(co_streams.last_seen_at, excluded.last_seen_at),
        updated_at = excluded.updated_at";

const CO_STREAM_COLUMNS: &str = "
    cs.id, e.slug, cs.platform, c.handle, cs.url, cs.lang, cs.country,
    cs.viewers, cs.verified, cs.is_live, cs.last_seen_at
    FROM co_streams cs
    JOIN events e ON e.id = cs.event_id
    JOIN creators c ON c.id = cs.creator_id";

/// One co-stream row joined with its event slug and creator handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoStreamRow {
    pub id: i64,
    pub event_slug: String,
    pub platform: String,
    pub handle: String,
    pub url: String,
    pub lang: String,
    pub country: String,
    pub viewers: u32,
    pub verified: bool,
    pub is_live: bool,
    pub last_seen_at: i64,
}

impl CoStreamRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_slug: row.get(1)?,
            platform: row.get(2)?,
            handle: row.get(3)?,
            url: row.get(4)?,
            lang: row.get(5)?,
            country: row.get(6)?,
            viewers: row.get(7)?,
            verified: row.get(8)?,
            is_live: row.get(9)?,
            last_seen_at: row.get(10)?,
        })
    }
}

/// A creator the worker polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCreator {
    pub handle: String,
    pub verified: bool,
    pub lang: String,
    pub country: String,
}

fn validate_co_stream(upsert: &CoStreamUpsert) -> Result<(), StoreError> {
    if upsert.event.slug.trim().is_empty() {
        return Err(StoreError::Validation("event slug is required".to_string()));
    }
    if upsert.platform.trim().is_empty() {
        return Err(StoreError::Validation("platform is required".to_string()));
    }
    if upsert.handle.trim().is_empty() {
        return Err(StoreError::Validation("handle is required".to_string()));
    }
    Ok(())
}

impl SqliteStore {
    /// Merge one observation into events, creators and co_streams
    ///
    /// All three upserts run in one IMMEDIATE transaction: either every row
    /// is written or none is. Duplicates are prevented by the unique keys,
    /// so concurrent writers on other connections converge on one row.
    pub fn upsert_co_stream(&self, upsert: &CoStreamUpsert) -> Result<(), StoreError> {
        validate_co_stream(upsert)?;

        let now = self.now();
        let slug = upsert.event.slug.trim();
        let platform = upsert.platform.trim().to_lowercase();
        let handle = upsert.handle.trim().to_lowercase();

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let event_id: i64 = tx
            .query_row(
                UPSERT_EVENT_SQL,
                params![
                    slug,
                    upsert.event.title,
                    upsert.event.game,
                    upsert.event.league.trim(),
                    upsert.event.starts_at.unwrap_or(now),
                    now,
                ],
                |row| row.get(0),
            )
            .map_err(write_error(format!("event {}", slug)))?;

        let creator_id: i64 = tx
            .query_row(
                UPSERT_CREATOR_SQL,
                params![
                    platform,
                    handle,
                    upsert.url,
                    upsert.lang,
                    upsert.country,
                    upsert.verified,
                    now,
                ],
                |row| row.get(0),
            )
            .map_err(write_error(format!("creator {}:{}", platform, handle)))?;

        tx.execute(
            UPSERT_CO_STREAM_SQL,
            params![
                event_id,
                creator_id,
                platform,
                upsert.url,
                upsert.lang,
                upsert.country,
                upsert.viewers,
                upsert.verified,
                upsert.is_live,
                now,
            ],
        )
        .map_err(write_error(format!("co_stream {} <- {}:{}", slug, platform, handle)))?;

        tx.commit()?;

        log::debug!(
            "   ├─ co_stream {} <- {}:{} ({} viewers, live={})",
            slug,
            platform,
            handle,
            upsert.viewers,
            upsert.is_live
        );

        Ok(())
    }

    /// Flip live rows whose `last_seen_at` is older than `now - older_than`
    ///
    /// Never deletes and never touches events or creators.
    pub fn mark_stale_offline(&self, older_than: Duration) -> Result<usize, StoreError> {
        let now = self.now();
        let cutoff = clock::cutoff(now, older_than);

        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE co_streams SET is_live = 0, updated_at = ?2
             WHERE is_live = 1 AND last_seen_at < ?1",
            params![cutoff, now],
        )?;

        Ok(affected)
    }

    /// Register a handle for polling. Re-tracking only updates `verified`.
    pub fn track_creator(&self, platform: &str, handle: &str, verified: bool) -> Result<(), StoreError> {
        let platform = platform.trim().to_lowercase();
        let handle = handle.trim().to_lowercase();
        if platform.is_empty() || handle.is_empty() {
            return Err(StoreError::Validation("platform and handle are required".to_string()));
        }

        let now = self.now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO creators (platform, handle, verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(platform, handle) DO UPDATE SET
                 verified = excluded.verified,
                 updated_at = excluded.updated_at",
            params![platform, handle, verified, now],
        )
        .map_err(write_error(format!("creator {}:{}", platform, handle)))?;

        Ok(())
    }

    /// Creators on `platform`, in registration order
    pub fn list_creator_handles(
        &self,
        platform: &str,
        verified_only: bool,
    ) -> Result<Vec<TrackedCreator>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT handle, verified, lang, country FROM creators
             WHERE platform = ?1 AND (?2 = 0 OR verified = 1)
             ORDER BY id",
        )?;

        let creators = stmt
            .query_map(params![platform.to_lowercase(), verified_only], |row| {
                Ok(TrackedCreator {
                    handle: row.get(0)?,
                    verified: row.get(1)?,
                    lang: row.get(2)?,
                    country: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(creators)
    }

    /// Live co-streams of one event, most viewers first
    pub fn find_live_by_event(&self, slug: &str, lang: Option<&str>) -> Result<Vec<CoStreamRow>, StoreError> {
        let lang = lang.map(str::trim).filter(|l| !l.is_empty());

        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} WHERE e.slug = ?1 AND cs.is_live = 1 AND (?2 IS NULL OR cs.lang = ?2)
             ORDER BY cs.viewers DESC, cs.id",
            CO_STREAM_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![slug, lang], CoStreamRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn get_co_stream(
        &self,
        slug: &str,
        platform: &str,
        handle: &str,
    ) -> Result<Option<CoStreamRow>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} WHERE e.slug = ?1 AND c.platform = ?2 AND c.handle = ?3",
                    CO_STREAM_COLUMNS
                ),
                params![slug, platform.to_lowercase(), handle.to_lowercase()],
                CoStreamRow::from_row,
            )
            .optional()?;

        Ok(row)
    }

    pub fn co_stream_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM co_streams", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EventRef;
    use crate::store::test_support::*;

    fn sample(handle: &str, viewers: u32) -> CoStreamUpsert {
        CoStreamUpsert {
            event: EventRef {
                slug: "vct-masters".to_string(),
                title: "VCT Masters".to_string(),
                game: "val".to_string(),
                league: "VCT".to_string(),
                starts_at: None,
            },
            platform: "twitch".to_string(),
            handle: handle.to_string(),
            url: format!("https://twitch.tv/{}", handle),
            lang: "es".to_string(),
            country: "ES".to_string(),
            verified: true,
            viewers,
            is_live: true,
        }
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        let conn = store.lock();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_upsert_creates_all_three_rows() {
        let (_temp, _clock, store) = create_test_store();

        store.upsert_co_stream(&sample("Ibai", 1000)).unwrap();

        assert_eq!(count(&store, "events"), 1);
        assert_eq!(count(&store, "creators"), 1);
        assert_eq!(count(&store, "co_streams"), 1);

        let row = store.get_co_stream("vct-masters", "twitch", "ibai").unwrap().unwrap();
        assert_eq!(row.handle, "ibai");
        assert_eq!(row.viewers, 1000);
        assert!(row.verified);
        assert!(row.is_live);
        assert_eq!(row.last_seen_at, T0);
    }

    #[test]
    fn test_repeated_upsert_refreshes_same_row() {
        let (_temp, clock, store) = create_test_store();

        for i in 0..5 {
            clock.advance(30);
            store.upsert_co_stream(&sample("ibai", 1000 + i)).unwrap();
        }

        assert_eq!(store.co_stream_count().unwrap(), 1);
        let row = store.get_co_stream("vct-masters", "twitch", "ibai").unwrap().unwrap();
        assert_eq!(row.viewers, 1004);
        assert_eq!(row.last_seen_at, T0 + 150);
    }

    #[test]
    fn test_last_seen_never_rewinds() {
        let (_temp, clock, store) = create_test_store();

        clock.set(T0 + 100);
        store.upsert_co_stream(&sample("ibai", 10)).unwrap();
        clock.set(T0 + 50);
        store.upsert_co_stream(&sample("ibai", 20)).unwrap();

        let row = store.get_co_stream("vct-masters", "twitch", "ibai").unwrap().unwrap();
        assert_eq!(row.viewers, 20);
        assert_eq!(row.last_seen_at, T0 + 100);
    }

    #[test]
    fn test_empty_league_keeps_existing() {
        let (_temp, _clock, store) = create_test_store();

        store.upsert_co_stream(&sample("a", 1)).unwrap();

        let mut next = sample("b", 1);
        next.event.title = "VCT Masters Toronto".to_string();
        next.event.league = String::new();
        store.upsert_co_stream(&next).unwrap();

        let conn = store.lock();
        let (title, league): (String, Option<String>) = conn
            .query_row("SELECT title, league FROM events WHERE slug = 'vct-masters'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(title, "VCT Masters Toronto");
        assert_eq!(league.as_deref(), Some("VCT"));
    }

    #[test]
    fn test_missing_identity_rejected_without_writes() {
        let (_temp, _clock, store) = create_test_store();

        let mut bad = sample("ibai", 1);
        bad.event.slug = "  ".to_string();
        assert!(matches!(store.upsert_co_stream(&bad), Err(StoreError::Validation(_))));

        let mut bad = sample("", 1);
        bad.handle = String::new();
        assert!(matches!(store.upsert_co_stream(&bad), Err(StoreError::Validation(_))));

        assert_eq!(count(&store, "events"), 0);
        assert_eq!(count(&store, "creators"), 0);
    }

    #[test]
    fn test_mark_stale_offline() {
        let (_temp, clock, store) = create_test_store();

        store.upsert_co_stream(&sample("old", 1)).unwrap();
        clock.advance(9 * 60);
        store.upsert_co_stream(&sample("fresh", 1)).unwrap();
        clock.advance(2 * 60);

        let grace = Duration::from_secs(10 * 60);
        assert_eq!(store.mark_stale_offline(grace).unwrap(), 1);
        assert_eq!(store.mark_stale_offline(grace).unwrap(), 0);

        let old = store.get_co_stream("vct-masters", "twitch", "old").unwrap().unwrap();
        let fresh = store.get_co_stream("vct-masters", "twitch", "fresh").unwrap().unwrap();
        assert!(!old.is_live);
        assert!(fresh.is_live);
        assert_eq!(store.co_stream_count().unwrap(), 2);
    }

    #[test]
    fn test_huge_grace_sweeps_nothing() {
        let (_temp, clock, store) = create_test_store();

        store.upsert_co_stream(&sample("old", 1)).unwrap();
        clock.advance(24 * 3600);

        assert_eq!(store.mark_stale_offline(Duration::MAX).unwrap(), 0);
        let old = store.get_co_stream("vct-masters", "twitch", "old").unwrap().unwrap();
        assert!(old.is_live);
    }

    #[test]
    fn test_track_and_list_creators() {
        let (_temp, _clock, store) = create_test_store();

        store.track_creator("twitch", "Ibai", true).unwrap();
        store.track_creator("twitch", "unverified", false).unwrap();
        store.track_creator("youtube", "other", true).unwrap();
        store.track_creator("twitch", "IBAI", true).unwrap();

        let verified: Vec<_> = store
            .list_creator_handles("twitch", true)
            .unwrap()
            .into_iter()
            .map(|c| c.handle)
            .collect();
        assert_eq!(verified, vec!["ibai"]);

        assert_eq!(store.list_creator_handles("twitch", false).unwrap().len(), 2);
    }

    #[test]
    fn test_find_live_by_event_orders_and_filters() {
        let (_temp, _clock, store) = create_test_store();

        store.upsert_co_stream(&sample("small", 10)).unwrap();
        store.upsert_co_stream(&sample("big", 500)).unwrap();
        let mut english = sample("english", 900);
        english.lang = "en".to_string();
        store.upsert_co_stream(&english).unwrap();
        let mut offline = sample("offline", 5000);
        offline.is_live = false;
        store.upsert_co_stream(&offline).unwrap();

        let all: Vec<_> = store
            .find_live_by_event("vct-masters", None)
            .unwrap()
            .into_iter()
            .map(|r| r.handle)
            .collect();
        assert_eq!(all, vec!["english", "big", "small"]);

        let es: Vec<_> = store
            .find_live_by_event("vct-masters", Some("es"))
            .unwrap()
            .into_iter()
            .map(|r| r.handle)
            .collect();
        assert_eq!(es, vec!["big", "small"]);

        assert!(store.find_live_by_event("nope", None).unwrap().is_empty());
    }
}
