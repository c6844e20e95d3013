//! JSONL audit log writers.
//!
//! One append-only file per resource type per UTC day:
//! `agent-2026-08-30.jsonl`, `task-2026-08-30.jsonl`. Splitting by
//! resource type keeps an agent's lifecycle history greppable without
//! filtering task noise out of a combined stream. Rotation is lazy: the
//! first write after the date changes opens the new file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

/// An open log file and the UTC date it was opened for.
struct OpenFile {
    date: NaiveDate,
    writer: BufWriter<File>,
}

/// Audit logger that appends JSONL records under a log directory,
/// fanning entries out to one file per resource type.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    files: Mutex<HashMap<String, OpenFile>>,
}

impl JsonlAuditWriter {
    /// Construct a writer that stores logs in `log_dir`.
    ///
    /// Creates `log_dir` and all parent directories if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|err| {
            AppError::Config(format!(
                "failed to create audit log directory {}: {err}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    fn open_file(&self, resource_type: &str, date: NaiveDate) -> Result<BufWriter<File>> {
        let path = self.log_dir.join(format!("{resource_type}-{date}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AppError::Internal(format!("failed to open audit log {}: {err}", path.display()))
            })?;
        Ok(BufWriter::new(file))
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        let today = Utc::now().date_naive();
        let line = serde_json::to_string(&entry)
            .map_err(|err| AppError::Internal(format!("failed to serialize audit entry: {err}")))?;

        let mut files = self
            .files
            .lock()
            .map_err(|_| AppError::Internal("audit writer mutex poisoned".into()))?;

        let slot = match files.entry(entry.resource_type.clone()) {
            Entry::Occupied(occupied) => {
                let slot = occupied.into_mut();
                if slot.date != today {
                    slot.writer = self.open_file(&entry.resource_type, today)?;
                    slot.date = today;
                }
                slot
            }
            Entry::Vacant(vacant) => vacant.insert(OpenFile {
                date: today,
                writer: self.open_file(&entry.resource_type, today)?,
            }),
        };

        writeln!(slot.writer, "{line}")
            .and_then(|()| slot.writer.flush())
            .map_err(|err| AppError::Internal(format!("audit write failed: {err}")))?;

        Ok(())
    }
}
