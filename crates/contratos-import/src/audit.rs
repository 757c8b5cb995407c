//! File sinks under the runtime directory.
//!
//! - `audit.jsonl`: every committed log entry, one JSON object per line, append-only.
//! - `last_import.json`: summary of the most recent commit, rewritten each time.
//! - `import_history.jsonl`: every commit summary, append-only, read back
//!   newest first by [`AuditLog::history`].
//!
//! The store's `audit_log` table is authoritative; these files mirror it.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use contratos_core::{AuditAction, LogEntry};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ImportError;

pub const AUDIT_FILE: &str = "audit.jsonl";
pub const LAST_IMPORT_FILE: &str = "last_import.json";
pub const HISTORY_FILE: &str = "import_history.jsonl";

/// What one committed batch did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub total_rows: usize,
    pub duplicates_at_preview: usize,
    pub invalid_rows: usize,
    pub applied: usize,
    pub skipped_duplicates: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub updated: usize,
    pub returned: usize,
    pub exchanged: usize,
    /// Contract numbers whose figures were recomputed.
    pub contracts: Vec<String>,
}

impl ImportSummary {
    /// Tally item-level actions from the batch's log entries.
    pub fn count_actions<'a>(&mut self, entries: impl IntoIterator<Item = &'a LogEntry>) {
        for entry in entries {
            match entry.action {
                AuditAction::EnvioInserted => self.inserted += 1,
                AuditAction::EnvioUpdated => self.updated += 1,
                AuditAction::Retorno => self.returned += 1,
                AuditAction::TrocaRetorno => self.exchanged += 1,
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append_lines<T: Serialize>(&self, file: &str, values: &[T]) -> Result<(), ImportError> {
        fs::create_dir_all(&self.dir)?;
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        let mut w = BufWriter::new(f);
        for v in values {
            serde_json::to_writer(&mut w, v)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        Ok(())
    }

    /// Append entries to `audit.jsonl`.
    pub fn append(&self, entries: &[LogEntry]) -> Result<(), ImportError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.append_lines(AUDIT_FILE, entries)
    }

    /// Rewrite `last_import.json` and append to `import_history.jsonl`.
    pub fn record_import(&self, summary: &ImportSummary) -> Result<(), ImportError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{LAST_IMPORT_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(summary)?)?;
        fs::rename(&tmp, self.dir.join(LAST_IMPORT_FILE))?;
        self.append_lines(HISTORY_FILE, std::slice::from_ref(summary))
    }

    /// Up to `limit` commit summaries from `import_history.jsonl`, newest
    /// first. Lines that do not parse are skipped.
    pub fn history(&self, limit: usize) -> Result<Vec<ImportSummary>, ImportError> {
        let path = self.dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        let mut summaries = Vec::new();
        for (idx, line) in text.lines().collect::<Vec<_>>().into_iter().enumerate().rev() {
            if summaries.len() == limit {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping unreadable import history line"),
            }
        }
        Ok(summaries)
    }

    /// The most recent summary, if any commit has happened.
    pub fn last_import(&self) -> Result<Option<ImportSummary>, ImportError> {
        let path = self.dir.join(LAST_IMPORT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(batch_id: i64) -> ImportSummary {
        ImportSummary {
            batch_id,
            file_name: Some("mov.csv".into()),
            committed_at: Utc::now(),
            applied: 2,
            contracts: vec!["123".into()],
            ..ImportSummary::default()
        }
    }

    #[test]
    fn appends_one_json_object_per_line() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path().join("runtime"));
        log.append(&[LogEntry::new(AuditAction::Retorno, "123")]).unwrap();
        log.append(&[
            LogEntry::new(AuditAction::EnvioInserted, "123"),
            LogEntry::new(AuditAction::BatchApplied, "123"),
        ])
        .unwrap();
        log.append(&[]).unwrap();

        let text = fs::read_to_string(log.dir().join(AUDIT_FILE)).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: LogEntry = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.action, AuditAction::BatchApplied);
    }

    #[test]
    fn last_import_rewritten_history_appended() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        assert!(log.last_import().unwrap().is_none());

        log.record_import(&summary(1)).unwrap();
        log.record_import(&summary(2)).unwrap();

        let last = log.last_import().unwrap().unwrap();
        assert_eq!(last.batch_id, 2);
        let history = fs::read_to_string(tmp.path().join(HISTORY_FILE)).unwrap();
        assert_eq!(history.lines().count(), 2);
        assert!(!tmp.path().join("last_import.json.tmp").exists());
    }

    #[test]
    fn history_newest_first_skipping_bad_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        assert!(log.history(10).unwrap().is_empty());

        log.record_import(&summary(1)).unwrap();
        let mut f = OpenOptions::new().append(true).open(tmp.path().join(HISTORY_FILE)).unwrap();
        f.write_all(b"not json\n\n").unwrap();
        drop(f);
        log.record_import(&summary(2)).unwrap();
        log.record_import(&summary(3)).unwrap();

        let ids: Vec<_> = log.history(10).unwrap().iter().map(|s| s.batch_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        let ids: Vec<_> = log.history(2).unwrap().iter().map(|s| s.batch_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert!(log.history(0).unwrap().is_empty());
    }

    #[test]
    fn counts_item_actions() {
        let entries = [
            LogEntry::new(AuditAction::EnvioInserted, "1"),
            LogEntry::new(AuditAction::EnvioInserted, "1"),
            LogEntry::new(AuditAction::TrocaRetorno, "1"),
            LogEntry::new(AuditAction::TrocaEnvio, "1"),
            LogEntry::new(AuditAction::BatchApplied, "1"),
        ];
        let mut s = ImportSummary::default();
        s.count_actions(&entries);
        assert_eq!((s.inserted, s.updated, s.returned, s.exchanged), (2, 0, 0, 1));
    }
}
