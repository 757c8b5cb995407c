//! Staging: parse and dedup a file into a persisted, not-yet-applied batch.

use std::collections::HashMap;

use chrono::Utc;
use contratos_core::{BatchStatus, ImportBatch, StagedRecord};
use contratos_store::{Connection, rows};
use tracing::info;

use crate::ImportError;
use crate::{dedup, ingest};

/// Preview warnings for a contract, looked up once per contract number.
fn header_warnings(conn: &Connection, contract: &str) -> Result<Vec<String>, ImportError> {
    let warnings = match rows::find_header(conn, contract)? {
        None => vec![format!("contract {contract} not registered")],
        Some(h) => {
            let missing = h.meta.missing_fields();
            if missing.is_empty() {
                Vec::new()
            } else {
                vec![format!("header {contract} incomplete: missing {}", missing.join(", "))]
            }
        }
    };
    Ok(warnings)
}

/// Parse `bytes`, drop duplicates and invalid rows, and persist the rest as
/// a `STAGED` batch. Nothing in the contract tables changes.
pub fn preview(
    conn: &Connection,
    bytes: &[u8],
    file_name: Option<&str>,
) -> Result<ImportBatch, ImportError> {
    let parsed = ingest::parse_movements(bytes)?;
    let seen = rows::seen_fingerprints(conn)?;
    let filtered = dedup::filter(parsed.records, &seen);

    let mut by_contract: HashMap<String, Vec<String>> = HashMap::new();
    let mut records = Vec::with_capacity(filtered.admitted.len());
    for (position, (fingerprint, record)) in filtered.admitted.into_iter().enumerate() {
        let warnings = match by_contract.get(&record.contract_number) {
            Some(w) => w.clone(),
            None => {
                let w = header_warnings(conn, &record.contract_number)?;
                by_contract.insert(record.contract_number.clone(), w.clone());
                w
            }
        };
        records.push(StagedRecord {
            position,
            fingerprint,
            record,
            warnings,
        });
    }

    let duplicates = filtered.duplicates.len();
    let invalid = parsed.invalid.len();
    let mut exclusions = parsed.invalid;
    exclusions.extend(filtered.duplicates);
    exclusions.sort_by_key(|e| e.row);

    let batch = ImportBatch {
        id: 0,
        file_name: file_name.map(str::to_string),
        status: BatchStatus::Staged,
        created_at: Utc::now(),
        closed_at: None,
        total_rows: parsed.total_rows,
        duplicates,
        invalid,
        outcome: None,
        records,
        exclusions,
    };
    let id = rows::insert_batch(conn, &batch)?;
    info!(
        batch = id,
        rows = batch.total_rows,
        admitted = batch.admitted(),
        duplicates,
        invalid,
        "staged import batch"
    );
    Ok(ImportBatch { id, ..batch })
}

/// Load a batch, or fail with [`ImportError::BatchNotFound`].
pub fn load(conn: &Connection, id: i64) -> Result<ImportBatch, ImportError> {
    rows::load_batch(conn, id)?.ok_or(ImportError::BatchNotFound(id))
}

/// Load a batch that must still be `STAGED`.
pub fn load_staged(conn: &Connection, id: i64) -> Result<ImportBatch, ImportError> {
    let batch = load(conn, id)?;
    if batch.status != BatchStatus::Staged {
        return Err(ImportError::BatchNotStaged {
            id,
            status: batch.status,
        });
    }
    Ok(batch)
}

/// Drop a staged batch without applying it.
pub fn discard(conn: &Connection, id: i64) -> Result<(), ImportError> {
    load_staged(conn, id)?;
    rows::close_batch(conn, id, BatchStatus::Discarded, Utc::now(), None)?;
    info!(batch = id, "discarded import batch");
    Ok(())
}
