//! Append-only JSONL store with durable writes.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entry::{AuditEntry, EntryDraft};
use crate::error::AuditError;

struct Writer {
    file: File,
    /// Next seq per session, seeded from the existing log on open.
    seqs: HashMap<String, u64>,
}

/// Single-writer audit log. Every record is fsynced before `record`
/// returns; there is no update or delete operation on entries, only the
/// retention compaction in [`AuditLog::compact`].
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, replaying it to restore the
    /// per-session sequence counters.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] on filesystem failure and
    /// [`AuditError::Corrupt`] when an existing record does not parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut seqs = HashMap::new();
        if path.exists() {
            for entry in read_entries(&path)? {
                let next = seqs.entry(entry.draft.session_id.clone()).or_insert(0);
                *next = (*next).max(entry.seq);
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, seqs }),
        })
    }

    /// Assign identity and order to `draft`, append it, and fsync.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] when the write or the sync fails.
    pub fn record(&self, draft: EntryDraft) -> Result<AuditEntry, AuditError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let seq = writer
            .seqs
            .entry(draft.session_id.clone())
            .and_modify(|s| *s += 1)
            .or_insert(1);
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            seq: *seq,
            draft,
        };
        let mut line = serde_json::to_string(&entry).map_err(|e| AuditError::Corrupt {
            line: 0,
            reason: e.to_string(),
        })?;
        line.push('\n');
        writer
            .file
            .write_all(line.as_bytes())
            .and_then(|()| writer.file.sync_data())
            .map_err(|source| AuditError::Io {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(
            session = %entry.draft.session_id,
            seq = entry.seq,
            outcome = %entry.draft.outcome,
            "audit entry recorded"
        );
        Ok(entry)
    }

    /// All entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] or [`AuditError::Corrupt`].
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        // Hold the writer lock so a concurrent append cannot tear a line.
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        read_entries(&self.path)
    }

    /// Delete entries older than `cutoff`. Surviving records are carried
    /// over byte-for-byte; nothing is ever rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] on filesystem failure.
    pub fn compact(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let io_err = |source| AuditError::Io {
            path: self.path.clone(),
            source,
        };

        let reader = BufReader::new(File::open(&self.path).map_err(io_err)?);
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path).map_err(io_err)?;
        let mut dropped = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry =
                serde_json::from_str(&line).map_err(|e| AuditError::Corrupt {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            if entry.timestamp < cutoff {
                dropped += 1;
            } else {
                tmp.write_all(line.as_bytes()).map_err(io_err)?;
                tmp.write_all(b"\n").map_err(io_err)?;
            }
        }
        tmp.sync_data().map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        writer.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        tracing::info!(dropped, cutoff = %cutoff, "audit log compacted");
        Ok(dropped)
    }
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| AuditError::Corrupt {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
