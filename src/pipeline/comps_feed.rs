//! Composition samples read from an append-only JSONL file
//!
//! One JSON object per line:
//!
//! ```text
//! {"game":"val","region":"emea","patch":"9.02","map":"Ascent","side":"atk",
//!  "slots":{"duelist":"jett","controller":"omen"},"win_rate":0.54}
//! ```
//!
//! `slots` may be an object or a string holding JSON. Each drain returns the
//! complete lines appended since the previous drain; a trailing partial line
//! is left for the next one. If the file shrinks (rotated or truncated) the
//! reader starts again from the top.

use super::types::CompositionUpsert;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lines parsed during one drain
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub samples: Vec<CompositionUpsert>,
    /// Lines that were not valid composition samples
    pub rejected: usize,
}

pub trait CompositionFeed: Send + Sync {
    fn drain(&self) -> io::Result<FeedBatch>;
}

#[derive(Debug, Deserialize)]
struct FeedLine {
    game: String,
    region: String,
    #[serde(default)]
    league: String,
    patch: String,
    #[serde(default)]
    map: String,
    #[serde(default)]
    side: String,
    slots: Value,
    #[serde(default)]
    pick_rate: Option<f64>,
    #[serde(default)]
    win_rate: Option<f64>,
    #[serde(default)]
    delta_win: Option<f64>,
}

impl From<FeedLine> for CompositionUpsert {
    fn from(line: FeedLine) -> Self {
        let slots = match line.slots {
            Value::String(raw) => raw,
            other => other.to_string(),
        };

        CompositionUpsert {
            game: line.game,
            region: line.region,
            league: line.league,
            patch: line.patch,
            map: line.map,
            side: line.side,
            slots,
            pick_rate: line.pick_rate,
            win_rate: line.win_rate,
            delta_win: line.delta_win,
        }
    }
}

pub fn parse_line(line: &str) -> Result<CompositionUpsert, serde_json::Error> {
    serde_json::from_str::<FeedLine>(line).map(CompositionUpsert::from)
}

pub struct JsonlCompositionFeed {
    path: PathBuf,
    offset: Mutex<u64>,
}

impl JsonlCompositionFeed {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CompositionFeed for JsonlCompositionFeed {
    fn drain(&self) -> io::Result<FeedBatch> {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FeedBatch::default()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < *offset {
            log::warn!("⚠️  {} shrank, re-reading from start", self.path.display());
            *offset = 0;
        }

        file.seek(SeekFrom::Start(*offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        // Only consume up to the last complete line
        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => &buf[..=idx],
            None => return Ok(FeedBatch::default()),
        };

        let mut batch = FeedBatch::default();
        for (idx, raw) in complete.split(|&b| b == b'\n').enumerate() {
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    log::warn!("⚠️  Skipping composition line {} of new data: {}", idx + 1, e);
                    batch.rejected += 1;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(sample) => batch.samples.push(sample),
                Err(e) => {
                    log::warn!("⚠️  Skipping composition line {} of new data: {}", idx + 1, e);
                    batch.rejected += 1;
                }
            }
        }

        *offset += complete.len() as u64;
        Ok(batch)
    }
}
