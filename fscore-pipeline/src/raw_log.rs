//! Raw reply log
//!
//! Every reply from the scoring service is captured verbatim, one JSON line
//! per batch, so normalization can be repeated offline without re-querying
//! the service. The first reply of a run truncates the log; later batches of
//! that run are appended and flushed one at a time.
//!
//! A file that is not entirely made of records (an older single-blob log,
//! or one repaired by hand) is read back as one verbatim record.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// One captured reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponseRecord {
    pub run_id: Uuid,
    pub batch_index: usize,
    pub raw_text: String,
    pub captured_at: DateTime<Utc>,
}

impl RawResponseRecord {
    pub fn new(run_id: Uuid, batch_index: usize, raw_text: String) -> Self {
        Self {
            run_id,
            batch_index,
            raw_text,
            captured_at: Utc::now(),
        }
    }
}

/// Append-only JSON Lines log of raw replies
#[derive(Debug, Clone)]
pub struct RawLog {
    path: PathBuf,
}

impl RawLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log for a new run
    pub fn begin_run(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;
            }
        }
        std::fs::File::create(&self.path).map_err(|e| self.storage_error(e))?;
        info!(path = %self.path.display(), "Raw log reset for new run");
        Ok(())
    }

    /// Append one record and flush it to disk
    pub fn append(&self, record: &RawResponseRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| self.storage_error(e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.storage_error(e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| self.storage_error(e))?;

        debug!(
            batch_index = record.batch_index,
            raw_chars = record.raw_text.len(),
            "Raw reply recorded"
        );
        Ok(())
    }

    /// Read every record; a missing or blank log yields none
    pub fn read_all(&self) -> Result<Vec<RawResponseRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.storage_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parsed: std::result::Result<Vec<RawResponseRecord>, _> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<RawResponseRecord>)
            .collect();

        match parsed {
            Ok(records) => Ok(records),
            Err(e) => {
                debug!(error = %e, "Raw log is not record-per-line, reading as one verbatim blob");
                let captured_at = std::fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(vec![RawResponseRecord {
                    run_id: Uuid::nil(),
                    batch_index: 0,
                    raw_text: content,
                    captured_at,
                }])
            }
        }
    }

    fn storage_error(&self, err: impl ToString) -> PipelineError {
        PipelineError::storage(&self.path, err)
    }
}
