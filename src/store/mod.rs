//! SQLite store for the event / creator / co-stream graph and compositions
//!
//! Tables (see `/sql/`):
//! - `events` - UPSERT on slug
//! - `creators` - UPSERT on (platform, handle)
//! - `co_streams` - UPSERT on (event_id, creator_id)
//! - `event_stream_rules`, `event_windows` - event resolution inputs
//! - `comps` - UPSERT on (game, region, league, patch, map, side, slots_fp)
//!
//! Deduplication relies on those UNIQUE constraints and `ON CONFLICT`
//! clauses, not on application locking: two connections to the same file
//! can upsert the same pair concurrently and still leave a single row.
//!
//! ## Module Organization
//!
//! - `costream` - the event/creator/co-stream merge, staleness flips
//! - `mapping` - stream rules, event windows, known events
//! - `comps` - composition fingerprinting, upsert and filtered reads

pub mod comps;
pub mod costream;
pub mod mapping;

use crate::clock::Clock;
use crate::pipeline::resolver::EventMapping;
use crate::pipeline::types::{CoStreamUpsert, CompositionUpsert};
use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use comps::{Composition, CompositionQuery};
pub use costream::{CoStreamRow, TrackedCreator};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing or malformed caller input, rejected before touching storage
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid composition payload: {0}")]
    InvalidCompositionPayload(String),

    /// A constraint other than the expected upsert keys rejected the write
    #[error("storage conflict on {entity}: {source}")]
    Conflict {
        entity: String,
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("schema migration failed: {0}")]
    Migration(String),
}

/// Map a write error to `Conflict` when it is a constraint violation
pub(crate) fn write_error(entity: String) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |err| match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict { entity, source: err },
        _ => StoreError::Database(err),
    }
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` and executes them in file-name
/// order (`01_`, `02_`, ...). Every statement must use `IF NOT EXISTS`, so
/// running this on an up-to-date database is a no-op.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Migration(format!(
            "schema directory not found: {}",
            schema_dir
        )));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)
        .map_err(|e| StoreError::Migration(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::debug!("   ├─ Executing: {}", filename);

        let sql_content =
            fs::read_to_string(&path).map_err(|e| StoreError::Migration(format!("{}: {}", filename, e)))?;

        conn.execute_batch(&sql_content)
            .map_err(|e| StoreError::Migration(format!("{}: {}", filename, e)))?;
    }

    log::info!("✅ Schema migrations complete");

    Ok(())
}

/// WAL, busy timeout and foreign keys for every connection we open
pub(crate) fn apply_connection_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Writer-side handle on the database
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the database file. Does not create the schema;
    /// call [`SqliteStore::migrate`] for that.
    pub fn open(db_path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        apply_connection_pragmas(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn migrate(&self, schema_dir: &str) -> Result<(), StoreError> {
        let mut conn = self.lock();
        run_schema_migrations(&mut conn, schema_dir)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What one ingestion cycle needs from storage
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Creators to poll on `platform`
    async fn tracked_creators(&self, platform: &str) -> Result<Vec<TrackedCreator>, StoreError>;

    /// Rules, windows active at `now`, and the events they point to
    async fn event_mapping(&self, now: i64) -> Result<EventMapping, StoreError>;

    async fn write_co_stream(&self, upsert: &CoStreamUpsert) -> Result<(), StoreError>;

    async fn write_composition(&self, comp: &CompositionUpsert) -> Result<(), StoreError>;

    /// Flip live rows not seen within `older_than` to offline
    async fn sweep_stale(&self, older_than: Duration) -> Result<usize, StoreError>;
}

#[async_trait]
impl IngestStore for SqliteStore {
    async fn tracked_creators(&self, platform: &str) -> Result<Vec<TrackedCreator>, StoreError> {
        self.list_creator_handles(platform, true)
    }

    async fn event_mapping(&self, now: i64) -> Result<EventMapping, StoreError> {
        self.load_mapping(now)
    }

    async fn write_co_stream(&self, upsert: &CoStreamUpsert) -> Result<(), StoreError> {
        self.upsert_co_stream(upsert)
    }

    async fn write_composition(&self, comp: &CompositionUpsert) -> Result<(), StoreError> {
        self.upsert_composition(comp)
    }

    async fn sweep_stale(&self, older_than: Duration) -> Result<usize, StoreError> {
        self.mark_stale_offline(older_than)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::NamedTempFile;

    pub const T0: i64 = 1_700_000_000;

    /// Fresh migrated database on a temp file, with a manual clock at `T0`
    pub fn create_test_store() -> (NamedTempFile, Arc<ManualClock>, SqliteStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let store = SqliteStore::open(temp_file.path(), clock.clone()).unwrap();
        store.migrate("sql").unwrap();
        (temp_file, clock, store)
    }
}
