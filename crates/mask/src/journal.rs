//! Append-only review journal, one JSON-lines file per chunk.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::locks::KeyedLocks;
use crate::types::{ChunkId, ItemIndex, QueryId, ReviewAction, ReviewEvent, StatusProjection};

pub struct ReviewJournal {
    root: PathBuf,
    locks: KeyedLocks<ChunkId>,
    last_timestamp: Mutex<DateTime<Utc>>,
}

impl ReviewJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
            last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self, chunk_id: ChunkId) -> PathBuf {
        self.root.join(format!("chunk_{}.jsonl", chunk_id))
    }

    /// Validate `action` and append one event. Invalid actions never reach disk.
    pub fn append(
        &self,
        chunk_id: ChunkId,
        index: ItemIndex,
        image_name: &str,
        query_id: QueryId,
        action: &str,
    ) -> Result<ReviewEvent> {
        let action = ReviewAction::parse(action)?;
        self.append_action(chunk_id, index, image_name, query_id, action)
    }

    pub fn append_action(
        &self,
        chunk_id: ChunkId,
        index: ItemIndex,
        image_name: &str,
        query_id: QueryId,
        action: ReviewAction,
    ) -> Result<ReviewEvent> {
        let event = ReviewEvent {
            chunk_id,
            index,
            image_name: image_name.to_string(),
            query_id,
            action,
            timestamp: self.next_timestamp(),
        };
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        self.locks.with(&chunk_id, || self.write_line(chunk_id, line))?;

        info!("Chunk {} item {}: {} ({}#{})", chunk_id, index, action, image_name, query_id);
        Ok(event)
    }

    /// Reduce the chunk's log to the latest action per item index.
    pub fn replay(&self, chunk_id: ChunkId) -> Result<StatusProjection> {
        let bytes = match fs::read(self.log_path(chunk_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StatusProjection::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut projection = StatusProjection::new();
        let mut skipped = 0usize;
        for (line_no, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match parse_line(line, chunk_id) {
                Some((index, action)) => {
                    projection.insert(index, action);
                }
                None => {
                    debug!("Chunk {} journal line {} ignored", chunk_id, line_no + 1);
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!("Chunk {} replay skipped {} unusable lines", chunk_id, skipped);
        }
        Ok(projection)
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().max(*last);
        *last = now;
        now
    }

    fn write_line(&self, chunk_id: ChunkId, mut line: Vec<u8>) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path(chunk_id))?;
        if ends_mid_line(&mut file)? {
            // a previous writer died mid-record; start on a fresh line
            line.insert(0, b'\n');
        }
        // one write per event keeps lines whole under O_APPEND
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }
}

fn ends_mid_line(file: &mut File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Extract `(index, action)` from a line that belongs to `chunk_id`.
///
/// Parsed loosely so that a record with extra or missing unrelated fields
/// still counts, while truncated or foreign lines are dropped.
fn parse_line(line: &[u8], chunk_id: ChunkId) -> Option<(ItemIndex, ReviewAction)> {
    let record: Value = serde_json::from_slice(line).ok()?;
    if record.get("chunk_id")?.as_i64()? != chunk_id {
        return None;
    }
    let index = record.get("index")?.as_i64()?;
    let action = ReviewAction::parse(record.get("action")?.as_str()?).ok()?;
    Some((index, action))
}
