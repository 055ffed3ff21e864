//! Stream rules, event windows and the labels of events they point to

use super::{write_error, SqliteStore, StoreError};
use crate::pipeline::resolver::{EventMapping, EventWindow, KnownEvent, StreamRule};
use rusqlite::params;

impl SqliteStore {
    /// Bind (platform, handle) to an event. Re-binding replaces the slug.
    pub fn upsert_stream_rule(
        &self,
        platform: &str,
        handle: &str,
        event_slug: &str,
        note: &str,
    ) -> Result<(), StoreError> {
        let platform = platform.trim().to_lowercase();
        let handle = handle.trim().to_lowercase();
        let event_slug = event_slug.trim();
        if platform.is_empty() || handle.is_empty() || event_slug.is_empty() {
            return Err(StoreError::Validation(
                "platform, handle and event slug are required".to_string(),
            ));
        }

        let now = self.now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO event_stream_rules (platform, handle, event_slug, note, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(platform, handle) DO UPDATE SET
                 event_slug = excluded.event_slug,
                 note = excluded.note,
                 updated_at = excluded.updated_at",
            params![platform, handle, event_slug, note, now],
        )
        .map_err(write_error(format!("stream rule {}:{}", platform, handle)))?;

        Ok(())
    }

    pub fn load_stream_rules(&self) -> Result<Vec<StreamRule>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT platform, handle, event_slug FROM event_stream_rules ORDER BY id")?;

        let rules = stmt
            .query_map([], |row| {
                Ok(StreamRule {
                    platform: row.get(0)?,
                    handle: row.get(1)?,
                    event_slug: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    pub fn insert_event_window(&self, window: &EventWindow) -> Result<i64, StoreError> {
        if window.event_slug.trim().is_empty() {
            return Err(StoreError::Validation("event slug is required".to_string()));
        }
        if window.ends_at < window.starts_at {
            return Err(StoreError::Validation(format!(
                "window for {} ends before it starts",
                window.event_slug
            )));
        }

        let now = self.now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO event_windows (event_slug, starts_at, ends_at, region, lang, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                window.event_slug.trim(),
                window.starts_at,
                window.ends_at,
                window.region,
                window.lang.trim().to_lowercase(),
                now,
            ],
        )
        .map_err(write_error(format!("event window {}", window.event_slug)))?;

        Ok(conn.last_insert_rowid())
    }

    /// Windows containing `now`, earliest start first
    pub fn active_windows(&self, now: i64) -> Result<Vec<EventWindow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT event_slug, starts_at, ends_at, region, lang FROM event_windows
             WHERE starts_at <= ?1 AND ends_at >= ?1
             ORDER BY starts_at, id",
        )?;

        let windows = stmt
            .query_map(params![now], |row| {
                Ok(EventWindow {
                    event_slug: row.get(0)?,
                    starts_at: row.get(1)?,
                    ends_at: row.get(2)?,
                    region: row.get(3)?,
                    lang: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(windows)
    }

    /// Stored labels of every event a rule or an active window points to
    pub fn known_events(&self, now: i64) -> Result<Vec<KnownEvent>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT slug, title, game, COALESCE(league, '') FROM events
             WHERE slug IN (
                 SELECT event_slug FROM event_stream_rules
                 UNION
                 SELECT event_slug FROM event_windows WHERE starts_at <= ?1 AND ends_at >= ?1
             )",
        )?;

        let events = stmt
            .query_map(params![now], |row| {
                Ok(KnownEvent {
                    slug: row.get(0)?,
                    title: row.get(1)?,
                    game: row.get(2)?,
                    league: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Everything the resolver needs for one cycle at `now`
    pub fn load_mapping(&self, now: i64) -> Result<EventMapping, StoreError> {
        Ok(EventMapping {
            rules: self.load_stream_rules()?,
            windows: self.active_windows(now)?,
            events: self.known_events(now)?,
        })
    }
}
