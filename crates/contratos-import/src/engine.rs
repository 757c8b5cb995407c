//! The import engine: one owner of the store and the audit sinks, exposing
//! every pipeline operation with its transaction boundary.
//!
//! Each mutating operation runs in a single store transaction and mirrors
//! its log entries to the file sinks only after the transaction commits.
//! A sink failure is logged and never undoes a committed operation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, NaiveDate, Utc};
use contratos_core::{
    AuditAction, BatchStatus, CommitCounts, ContractHeader, ContractItem, Exclusion,
    ExclusionKind, Fingerprint, HeaderMeta, ImportBatch, LogEntry, LogKind, MovementRecord,
};
use contratos_store::{
    Connection, Dashboard, DashboardFilter, DuckStore, ItemFilter, ItemPage, StoreError, rows,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::apply::{self, Applied, ItemChange};
use crate::audit::{AuditLog, ImportSummary};
use crate::headers::{self, DuplicatePolicy, HeaderImportReport};
use crate::recompute::recompute_header;
use crate::{ImportError, stage};

/// Result of committing a staged batch.
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub summary: ImportSummary,
    /// Records skipped because their header failed validation.
    pub rejections: Vec<Exclusion>,
    /// Every header touched by the batch, after recomputation.
    pub headers: Vec<ContractHeader>,
    pub entries: Vec<LogEntry>,
}

impl CommitOutcome {
    pub fn counts(&self) -> CommitCounts {
        CommitCounts {
            applied: self.summary.applied,
            skipped_duplicates: self.summary.skipped_duplicates,
            rejected: self.summary.rejected,
        }
    }
}

/// A header with its active items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderDetail {
    #[serde(flatten)]
    pub header: ContractHeader,
    pub items: Vec<ContractItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecalcReport {
    pub headers: usize,
    pub changed: usize,
}

/// Outcome of recomputing one contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderRecalc {
    pub header: ContractHeader,
    pub items: usize,
    /// Whether the figures moved (and a `RECALCULATED` entry was written).
    pub changed: bool,
}

pub struct Engine {
    store: DuckStore,
    audit: AuditLog,
    today: Option<NaiveDate>,
}

impl Engine {
    pub fn new(store: DuckStore, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            audit: AuditLog::new(runtime_dir),
            today: None,
        }
    }

    /// Pin the reference date used by recomputation.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn store(&self) -> &DuckStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn mirror(&self, entries: &[LogEntry]) {
        if let Err(e) = self.audit.append(entries) {
            warn!(error = %e, dir = %self.audit.dir().display(), "failed to mirror audit entries");
        }
    }

    // ── Imports ──

    /// Stage a movement file. Nothing in the contract tables changes.
    pub fn preview(&mut self, bytes: &[u8], file_name: Option<&str>) -> Result<ImportBatch, ImportError> {
        let tx = self.store.transaction()?;
        let batch = stage::preview(&tx, bytes, file_name)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(batch)
    }

    pub fn batch(&self, id: i64) -> Result<ImportBatch, ImportError> {
        stage::load(self.store.connection(), id)
    }

    pub fn discard(&mut self, id: i64) -> Result<(), ImportError> {
        let tx = self.store.transaction()?;
        stage::discard(&tx, id)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    /// Apply a staged batch atomically. On any aborting error nothing is
    /// written and the batch stays `STAGED`.
    pub fn commit(&mut self, id: i64) -> Result<CommitOutcome, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let outcome = commit_batch(&tx, id, today)?;
        tx.commit().map_err(StoreError::from)?;

        info!(
            batch = id,
            applied = outcome.summary.applied,
            skipped_duplicates = outcome.summary.skipped_duplicates,
            rejected = outcome.summary.rejected,
            headers = outcome.headers.len(),
            "committed import batch"
        );
        self.mirror(&outcome.entries);
        if let Err(e) = self.audit.record_import(&outcome.summary) {
            warn!(error = %e, batch = id, "failed to record import summary");
        }
        Ok(outcome)
    }

    pub fn last_import(&self) -> Result<Option<ImportSummary>, ImportError> {
        self.audit.last_import()
    }

    // ── Headers ──

    pub fn register_header(&mut self, meta: HeaderMeta) -> Result<ContractHeader, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let (header, entry) = headers::register(&tx, meta, today)?;
        tx.commit().map_err(StoreError::from)?;
        self.mirror(std::slice::from_ref(&entry));
        Ok(header)
    }

    pub fn edit_header(&mut self, contract_number: &str, meta: HeaderMeta) -> Result<ContractHeader, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let (header, entry) = headers::edit(&tx, contract_number, meta, today)?;
        tx.commit().map_err(StoreError::from)?;
        self.mirror(std::slice::from_ref(&entry));
        Ok(header)
    }

    pub fn import_headers(
        &mut self,
        bytes: &[u8],
        policy: DuplicatePolicy,
    ) -> Result<HeaderImportReport, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let (report, entries) = headers::import(&tx, bytes, policy, today)?;
        tx.commit().map_err(StoreError::from)?;
        self.mirror(&entries);
        Ok(report)
    }

    pub fn list_headers(&self) -> Result<Vec<ContractHeader>, ImportError> {
        Ok(rows::list_headers(self.store.connection())?)
    }

    pub fn header_detail(&self, contract_number: &str) -> Result<HeaderDetail, ImportError> {
        let conn = self.store.connection();
        let header = rows::find_header(conn, contract_number)?
            .ok_or_else(|| ImportError::ContractNotFound(contract_number.trim().to_string()))?;
        let items = rows::active_items(conn, header.id)?;
        Ok(HeaderDetail { header, items })
    }

    // ── Recalculation ──

    /// Recompute every header against today. Headers whose figures moved
    /// get a `RECALCULATED` entry.
    pub fn recalc_all(&mut self) -> Result<RecalcReport, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let all = rows::list_headers(&tx)?;
        let mut entries = Vec::new();
        for before in &all {
            let (after, items) = recompute_header(&tx, before.id, today)?;
            if let Some(entry) = recalc_entry(&tx, before, &after, items, today)? {
                entries.push(entry);
            }
        }
        tx.commit().map_err(StoreError::from)?;

        let report = RecalcReport {
            headers: all.len(),
            changed: entries.len(),
        };
        info!(headers = report.headers, changed = report.changed, %today, "recalculated all headers");
        self.mirror(&entries);
        Ok(report)
    }

    /// Recompute a single contract against today.
    pub fn recalc_contract(&mut self, contract_number: &str) -> Result<HeaderRecalc, ImportError> {
        let today = self.today();
        let tx = self.store.transaction()?;
        let before = rows::find_header(&tx, contract_number)?
            .ok_or_else(|| ImportError::ContractNotFound(contract_number.trim().to_string()))?;
        let (header, items) = recompute_header(&tx, before.id, today)?;
        let entry = recalc_entry(&tx, &before, &header, items, today)?;
        tx.commit().map_err(StoreError::from)?;

        let changed = entry.is_some();
        info!(contract = %header.meta.contract_number, items, changed, %today, "recalculated contract");
        if let Some(entry) = entry {
            self.mirror(std::slice::from_ref(&entry));
        }
        Ok(HeaderRecalc {
            header,
            items,
            changed,
        })
    }

    // ── Reads ──

    pub fn dashboard(&self, filter: &DashboardFilter) -> Result<Dashboard, ImportError> {
        Ok(self.store.dashboard(filter, self.today())?)
    }

    pub fn list_items(&self, filter: &ItemFilter, page: usize, per_page: usize) -> Result<ItemPage, ImportError> {
        Ok(rows::list_items(self.store.connection(), filter, page, per_page)?)
    }

    /// Write the items matching `filter` as CSV. Returns the number of rows written.
    pub fn export_csv<W: Write>(&self, out: W, filter: &ItemFilter) -> Result<usize, ImportError> {
        Ok(self.store.export_items_csv(out, filter)?)
    }

    /// Committed import summaries, newest first.
    pub fn import_history(&self, limit: usize) -> Result<Vec<ImportSummary>, ImportError> {
        self.audit.history(limit)
    }

    pub fn logs(
        &self,
        kind: Option<LogKind>,
        contract_number: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ImportError> {
        Ok(rows::list_logs(self.store.connection(), kind, contract_number, limit)?)
    }
}

/// Persist a `RECALCULATED` entry when recomputation moved the figures.
fn recalc_entry(
    conn: &Connection,
    before: &ContractHeader,
    after: &ContractHeader,
    items: usize,
    today: NaiveDate,
) -> Result<Option<LogEntry>, ImportError> {
    if after.aggregates == before.aggregates {
        return Ok(None);
    }
    let mut entry = LogEntry::new(AuditAction::Recalculated, &after.meta.contract_number)
        .with_header(after.id)
        .with_detail(json!({
            "before": before.aggregates,
            "after": after.aggregates,
            "items": items,
            "today": today,
        }));
    entry.id = Some(rows::insert_log(conn, &entry)?);
    Ok(Some(entry))
}

// ── Commit ──

fn item_entry(
    batch_id: i64,
    record: &MovementRecord,
    fingerprint: &Fingerprint,
    change: ItemChange,
) -> LogEntry {
    let ItemChange { action, item } = change;
    let mut entry = LogEntry::new(action, &item.contract_number)
        .with_batch(batch_id)
        .with_header(item.header_id)
        .with_detail(json!({
            "row": record.row,
            "status": item.status,
            "monthly_value": item.monthly_value,
            "shipped_on": item.shipped_on,
            "exchanged_on": item.exchanged_on,
            "returned_on": item.returned_on,
            "service_order": record.service_order,
        }));
    entry.item_id = Some(item.id);
    entry.asset = Some(item.asset);
    entry.client_code = Some(item.client_code);
    entry.transaction = Some(record.transaction);
    entry.movement_date = Some(record.movement_date);
    entry.fingerprint = Some(fingerprint.clone());
    entry
}

/// Everything a commit writes, inside the caller's transaction.
fn commit_batch(conn: &Connection, id: i64, today: NaiveDate) -> Result<CommitOutcome, ImportError> {
    let batch = stage::load_staged(conn, id)?;
    let mut seen = rows::seen_fingerprints(conn)?;
    let now = Utc::now();

    let mut counts = CommitCounts::default();
    let mut rejections = Vec::new();
    let mut entries = Vec::new();
    // header id → records applied to it
    let mut touched: BTreeMap<i64, usize> = BTreeMap::new();

    for staged in &batch.records {
        let record = &staged.record;
        if seen.contains(&staged.fingerprint) {
            counts.skipped_duplicates += 1;
            continue;
        }
        match apply::apply(conn, record, &staged.fingerprint)? {
            Applied::Rejected(reason) => {
                counts.rejected += 1;
                rejections.push(Exclusion {
                    row: record.row,
                    kind: ExclusionKind::Invalid,
                    fingerprint: Some(staged.fingerprint.clone()),
                    messages: vec![reason],
                });
            }
            Applied::Done(effects) => {
                rows::record_history(conn, &staged.fingerprint, id, record.row, now)?;
                seen.insert(staged.fingerprint.clone());
                counts.applied += 1;
                *touched.entry(effects.header.id).or_default() += 1;
                for change in effects.changes {
                    entries.push(item_entry(id, record, &staged.fingerprint, change));
                }
            }
        }
    }

    let mut headers = Vec::with_capacity(touched.len());
    for (&header_id, &applied) in &touched {
        let (header, items) = recompute_header(conn, header_id, today)?;
        entries.push(
            LogEntry::new(AuditAction::BatchApplied, &header.meta.contract_number)
                .with_batch(id)
                .with_header(header_id)
                .with_detail(json!({
                    "applied": applied,
                    "items": items,
                    "months_remaining": header.aggregates.months_remaining,
                    "global_value": header.aggregates.global_value,
                    "present_value": header.aggregates.present_value,
                })),
        );
        headers.push(header);
    }

    for entry in &mut entries {
        entry.id = Some(rows::insert_log(conn, entry)?);
    }
    rows::close_batch(conn, id, BatchStatus::Committed, now, Some(counts))?;

    let mut summary = ImportSummary {
        batch_id: id,
        file_name: batch.file_name.clone(),
        committed_at: now,
        total_rows: batch.total_rows,
        duplicates_at_preview: batch.duplicates,
        invalid_rows: batch.invalid,
        applied: counts.applied,
        skipped_duplicates: counts.skipped_duplicates,
        rejected: counts.rejected,
        contracts: headers.iter().map(|h| h.meta.contract_number.clone()).collect(),
        ..ImportSummary::default()
    };
    summary.count_actions(&entries);

    Ok(CommitOutcome {
        summary,
        rejections,
        headers,
        entries,
    })
}
