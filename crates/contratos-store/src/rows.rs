//! Typed row access.
//!
//! Free functions over `&Connection` so they compose inside a
//! [`Transaction`](duckdb::Transaction). Dates are bound as ISO text and cast
//! in SQL; they are read back through `CAST(.. AS VARCHAR)`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use contratos_core::{
    AuditAction, BatchStatus, CommitCounts, ContractHeader, ContractItem, Derived, Exclusion,
    ExclusionKind, FieldError, Fingerprint, HeaderMeta, ImportBatch, LogEntry, LogKind, StagedRecord,
    TransactionType,
};
use duckdb::types::Type;
use duckdb::{Connection, OptionalExt, Row, params, params_from_iter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StoreError;

// ── Column decoding ──

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn date_col(row: &Row<'_>, idx: usize) -> duckdb::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn opt_date_col(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn instant_col(row: &Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_instant_col(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> duckdb::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, e))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> duckdb::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn count_col(row: &Row<'_>, idx: usize) -> duckdb::Result<usize> {
    let n: i64 = row.get(idx)?;
    Ok(n.max(0) as usize)
}

fn iso(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.to_string())
}

// ── Headers ──

const HEADER_COLS: &str = "id, contract_number, client_code, client_name, cnpj, term_months, \
     adjustment_index, seller, CAST(start_date AS VARCHAR), months_remaining, global_value, \
     present_value";

fn header_from_row(row: &Row<'_>) -> duckdb::Result<ContractHeader> {
    Ok(ContractHeader {
        id: row.get(0)?,
        meta: HeaderMeta {
            contract_number: row.get(1)?,
            client_code: row.get(2)?,
            client_name: row.get(3)?,
            cnpj: row.get(4)?,
            term_months: row.get(5)?,
            adjustment_index: row.get(6)?,
            seller: row.get(7)?,
            start_date: opt_date_col(row, 8)?,
        },
        aggregates: Derived {
            months_remaining: row.get(9)?,
            global_value: row.get(10)?,
            present_value: row.get(11)?,
        },
    })
}

/// Register a header. Contract numbers are unique and never change afterwards.
pub fn insert_header(conn: &Connection, meta: &HeaderMeta) -> Result<i64, StoreError> {
    if find_header(conn, &meta.contract_number)?.is_some() {
        return Err(StoreError::DuplicateContract(meta.contract_number.clone()));
    }
    let id: i64 = conn.query_row(
        "INSERT INTO contract_headers
            (contract_number, client_code, client_name, cnpj, term_months,
             adjustment_index, seller, start_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS DATE))
         RETURNING id",
        params![
            meta.contract_number,
            meta.client_code,
            meta.client_name,
            meta.cnpj,
            meta.term_months,
            meta.adjustment_index,
            meta.seller,
            iso(meta.start_date),
        ],
        |row| row.get(0),
    )?;
    debug!(id, contract = %meta.contract_number, "header inserted");
    Ok(id)
}

/// Overwrite a header's metadata. The contract number is left untouched.
pub fn update_header_meta(conn: &Connection, id: i64, meta: &HeaderMeta) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE contract_headers
         SET client_code = ?, client_name = ?, cnpj = ?, term_months = ?,
             adjustment_index = ?, seller = ?, start_date = CAST(? AS DATE)
         WHERE id = ?",
        params![
            meta.client_code,
            meta.client_name,
            meta.cnpj,
            meta.term_months,
            meta.adjustment_index,
            meta.seller,
            iso(meta.start_date),
            id,
        ],
    )?;
    if n == 0 {
        return Err(StoreError::NoResults);
    }
    Ok(())
}

pub fn set_header_aggregates(conn: &Connection, id: i64, values: &Derived) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE contract_headers
         SET months_remaining = ?, global_value = ?, present_value = ?
         WHERE id = ?",
        params![values.months_remaining, values.global_value, values.present_value, id],
    )?;
    Ok(())
}

pub fn find_header(conn: &Connection, contract_number: &str) -> Result<Option<ContractHeader>, StoreError> {
    let sql = format!("SELECT {HEADER_COLS} FROM contract_headers WHERE contract_number = ?");
    Ok(conn
        .query_row(&sql, [contract_number.trim()], header_from_row)
        .optional()?)
}

pub fn header_by_id(conn: &Connection, id: i64) -> Result<Option<ContractHeader>, StoreError> {
    let sql = format!("SELECT {HEADER_COLS} FROM contract_headers WHERE id = ?");
    Ok(conn.query_row(&sql, [id], header_from_row).optional()?)
}

pub fn list_headers(conn: &Connection) -> Result<Vec<ContractHeader>, StoreError> {
    let sql = format!("SELECT {HEADER_COLS} FROM contract_headers ORDER BY contract_number");
    let mut stmt = conn.prepare(&sql)?;
    let headers = stmt
        .query_map([], header_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(headers)
}

// ── Items ──

const ITEM_COLS: &str = "id, header_id, contract_number, asset, client_code, client_name, serial, \
     product_code, description, monthly_value, CAST(shipped_on AS VARCHAR), \
     CAST(exchanged_on AS VARCHAR), CAST(returned_on AS VARCHAR), last_transaction, status, \
     fingerprint, months_remaining, global_value, present_value";

fn item_from_row(row: &Row<'_>) -> duckdb::Result<ContractItem> {
    let fingerprint: Option<String> = row.get(15)?;
    Ok(ContractItem {
        id: row.get(0)?,
        header_id: row.get(1)?,
        contract_number: row.get(2)?,
        asset: row.get(3)?,
        client_code: row.get(4)?,
        client_name: row.get(5)?,
        serial: row.get(6)?,
        product_code: row.get(7)?,
        description: row.get(8)?,
        monthly_value: row.get(9)?,
        shipped_on: date_col(row, 10)?,
        exchanged_on: opt_date_col(row, 11)?,
        returned_on: opt_date_col(row, 12)?,
        last_transaction: parsed_col(row, 13)?,
        status: parsed_col(row, 14)?,
        fingerprint: fingerprint.map(Fingerprint::from_hex),
        derived: Derived {
            months_remaining: row.get(16)?,
            global_value: row.get(17)?,
            present_value: row.get(18)?,
        },
    })
}

/// Insert an item; `item.id` is ignored and the assigned id returned.
pub fn insert_item(conn: &Connection, item: &ContractItem) -> Result<i64, StoreError> {
    let id: i64 = conn.query_row(
        "INSERT INTO contract_items
            (header_id, contract_number, asset, client_code, client_name, serial,
             product_code, description, monthly_value, shipped_on, exchanged_on,
             returned_on, last_transaction, status, fingerprint,
             months_remaining, global_value, present_value)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS DATE), CAST(? AS DATE),
                 CAST(? AS DATE), ?, ?, ?, ?, ?, ?)
         RETURNING id",
        params![
            item.header_id,
            item.contract_number,
            item.asset,
            item.client_code,
            item.client_name,
            item.serial,
            item.product_code,
            item.description,
            item.monthly_value,
            item.shipped_on.to_string(),
            iso(item.exchanged_on),
            iso(item.returned_on),
            item.last_transaction.as_str(),
            item.status.as_str(),
            item.fingerprint.as_ref().map(|f| f.as_str().to_string()),
            item.derived.months_remaining,
            item.derived.global_value,
            item.derived.present_value,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Persist every mutable field of an existing item (identity columns stay).
pub fn update_item(conn: &Connection, item: &ContractItem) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE contract_items
         SET client_name = ?, serial = ?, product_code = ?, description = ?,
             monthly_value = ?, shipped_on = CAST(? AS DATE),
             exchanged_on = CAST(? AS DATE), returned_on = CAST(? AS DATE),
             last_transaction = ?, status = ?, fingerprint = ?
         WHERE id = ?",
        params![
            item.client_name,
            item.serial,
            item.product_code,
            item.description,
            item.monthly_value,
            item.shipped_on.to_string(),
            iso(item.exchanged_on),
            iso(item.returned_on),
            item.last_transaction.as_str(),
            item.status.as_str(),
            item.fingerprint.as_ref().map(|f| f.as_str().to_string()),
            item.id,
        ],
    )?;
    if n == 0 {
        return Err(StoreError::NoResults);
    }
    Ok(())
}

pub fn set_item_derived(conn: &Connection, id: i64, values: &Derived) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE contract_items
         SET months_remaining = ?, global_value = ?, present_value = ?
         WHERE id = ?",
        params![values.months_remaining, values.global_value, values.present_value, id],
    )?;
    Ok(())
}

pub fn item_by_id(conn: &Connection, id: i64) -> Result<Option<ContractItem>, StoreError> {
    let sql = format!("SELECT {ITEM_COLS} FROM contract_items WHERE id = ?");
    Ok(conn.query_row(&sql, [id], item_from_row).optional()?)
}

/// Oldest active item matching (contract, asset, client): earliest shipment, then lowest id.
pub fn find_active_item(
    conn: &Connection,
    contract_number: &str,
    asset: &str,
    client_code: &str,
) -> Result<Option<ContractItem>, StoreError> {
    let sql = format!(
        "SELECT {ITEM_COLS} FROM contract_items
         WHERE contract_number = ? AND asset = ? AND client_code = ? AND status = 'ACTIVE'
         ORDER BY shipped_on, id
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![contract_number, asset, client_code], item_from_row)
        .optional()?)
}

pub fn active_items(conn: &Connection, header_id: i64) -> Result<Vec<ContractItem>, StoreError> {
    let sql = format!(
        "SELECT {ITEM_COLS} FROM contract_items
         WHERE header_id = ? AND status = 'ACTIVE'
         ORDER BY shipped_on, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([header_id], item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn count_active_items(conn: &Connection, header_id: i64) -> Result<usize, StoreError> {
    Ok(conn.query_row(
        "SELECT count(*)::BIGINT FROM contract_items WHERE header_id = ? AND status = 'ACTIVE'",
        [header_id],
        |row| count_col(row, 0),
    )?)
}

// ── Item listing ──

pub const DEFAULT_PER_PAGE: usize = 25;
pub const MIN_PER_PAGE: usize = 5;
pub const MAX_PER_PAGE: usize = 200;

/// Append `AND contains(lower(column), ?)` for a non-blank needle. `%` and `_`
/// in the needle match literally.
pub(crate) fn push_contains(sql: &mut String, args: &mut Vec<String>, column: &str, needle: Option<&str>) {
    if let Some(needle) = needle.map(str::trim)
        && !needle.is_empty()
    {
        sql.push_str(&format!(" AND contains(lower(coalesce({column}, '')), ?)"));
        args.push(needle.to_lowercase());
    }
}

/// Sort key for item listings and exports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrder {
    #[default]
    ShippedOn,
    Id,
    ClientName,
    Asset,
    ContractNumber,
    MonthlyValue,
    MonthsRemaining,
}

impl ItemOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShippedOn => "shipped_on",
            Self::Id => "id",
            Self::ClientName => "client_name",
            Self::Asset => "asset",
            Self::ContractNumber => "contract_number",
            Self::MonthlyValue => "monthly_value",
            Self::MonthsRemaining => "months_remaining",
        }
    }
}

impl fmt::Display for ItemOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemOrder {
    type Err = FieldError;

    /// Accepts the column names and the spreadsheet names operators use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "shipped_on" | "data_envio" => Ok(Self::ShippedOn),
            "id" => Ok(Self::Id),
            "client_name" | "nome_cli" => Ok(Self::ClientName),
            "asset" | "ativo" => Ok(Self::Asset),
            "contract_number" | "contrato" | "contrato_num" => Ok(Self::ContractNumber),
            "monthly_value" | "valor_mensal" => Ok(Self::MonthlyValue),
            "months_remaining" | "meses_restantes" => Ok(Self::MonthsRemaining),
            other => Err(FieldError::Invalid {
                field: "order_by",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDir {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "" | "desc" => Ok(Self::Desc),
            other => Err(FieldError::Invalid {
                field: "order_dir",
                value: other.to_string(),
            }),
        }
    }
}

/// Item filters shared by the listing and the CSV export. Text filters are
/// case-insensitive substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    /// Also list items already returned.
    #[serde(default)]
    pub include_returned: bool,
    #[serde(default)]
    pub order_by: ItemOrder,
    #[serde(default)]
    pub order_dir: SortDir,
}

impl ItemFilter {
    /// SQL predicate over `contract_items` (columns qualified with `prefix`)
    /// plus its bind values.
    pub(crate) fn predicate(&self, prefix: &str) -> (String, Vec<String>) {
        let mut sql = if self.include_returned {
            String::from("TRUE")
        } else {
            format!("{prefix}status = 'ACTIVE'")
        };
        let mut args = Vec::new();
        push_contains(&mut sql, &mut args, &format!("{prefix}client_name"), self.client.as_deref());
        push_contains(&mut sql, &mut args, &format!("{prefix}contract_number"), self.contract.as_deref());
        push_contains(&mut sql, &mut args, &format!("{prefix}asset"), self.asset.as_deref());
        (sql, args)
    }

    /// `ORDER BY` body; ties break on id in the same direction.
    pub(crate) fn order(&self, prefix: &str) -> String {
        let dir = self.order_dir.as_str();
        match self.order_by {
            ItemOrder::Id => format!("{prefix}id {dir}"),
            key => format!("{prefix}{} {dir} NULLS LAST, {prefix}id {dir}", key.as_str()),
        }
    }
}

/// One page of items with totals over every match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPage {
    pub items: Vec<ContractItem>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub monthly_value_sum: f64,
    /// Sum of monthly value times months remaining.
    pub backlog_sum: f64,
}

/// Items matching `filter`, one page at a time. `page` is 1-based and
/// `per_page` is clamped to `MIN_PER_PAGE..=MAX_PER_PAGE`.
pub fn list_items(
    conn: &Connection,
    filter: &ItemFilter,
    page: usize,
    per_page: usize,
) -> Result<ItemPage, StoreError> {
    let page = page.max(1);
    let per_page = per_page.clamp(MIN_PER_PAGE, MAX_PER_PAGE);
    let (pred, args) = filter.predicate("");

    let sql = format!(
        "SELECT count(*)::BIGINT,
                coalesce(sum(monthly_value), 0)::DOUBLE,
                coalesce(sum(monthly_value * months_remaining), 0)::DOUBLE
         FROM contract_items WHERE {pred}"
    );
    let (total, monthly_value_sum, backlog_sum): (usize, f64, f64) =
        conn.query_row(&sql, params_from_iter(args.iter()), |row| {
            Ok((count_col(row, 0)?, row.get(1)?, row.get(2)?))
        })?;

    let offset = (page - 1) * per_page;
    let sql = format!(
        "SELECT {ITEM_COLS} FROM contract_items WHERE {pred}
         ORDER BY {}
         LIMIT {per_page} OFFSET {offset}",
        filter.order("")
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    debug!(total, page, per_page, returned = items.len(), "listed items");
    Ok(ItemPage {
        items,
        total,
        page,
        per_page,
        monthly_value_sum,
        backlog_sum,
    })
}

// ── Import batches ──

/// Persist a staged batch with its records and exclusions. Returns the new id.
pub fn insert_batch(conn: &Connection, batch: &ImportBatch) -> Result<i64, StoreError> {
    let id: i64 = conn.query_row(
        "INSERT INTO import_batches
            (file_name, status, created_at, total_rows, duplicates, invalid)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
        params![
            batch.file_name,
            batch.status.as_str(),
            batch.created_at.to_rfc3339(),
            batch.total_rows as i64,
            batch.duplicates as i64,
            batch.invalid as i64,
        ],
        |row| row.get(0),
    )?;

    let mut rec_stmt = conn.prepare(
        "INSERT INTO staged_records (batch_id, seq, fingerprint, record, warnings)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for staged in &batch.records {
        rec_stmt.execute(params![
            id,
            staged.position as i64,
            staged.fingerprint.as_str(),
            serde_json::to_string(&staged.record)?,
            serde_json::to_string(&staged.warnings)?,
        ])?;
    }

    let mut exc_stmt = conn.prepare(
        "INSERT INTO staged_exclusions (batch_id, source_row, kind, fingerprint, messages)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for exclusion in &batch.exclusions {
        exc_stmt.execute(params![
            id,
            exclusion.row as i64,
            exclusion.kind.as_str(),
            exclusion.fingerprint.as_ref().map(|f| f.as_str().to_string()),
            serde_json::to_string(&exclusion.messages)?,
        ])?;
    }
    Ok(id)
}

pub fn load_batch(conn: &Connection, id: i64) -> Result<Option<ImportBatch>, StoreError> {
    let head = conn
        .query_row(
            "SELECT id, file_name, status, created_at, closed_at, total_rows, duplicates,
                    invalid, applied, skipped_duplicates, rejected
             FROM import_batches WHERE id = ?",
            [id],
            |row| {
                let applied: Option<i64> = row.get(8)?;
                let outcome = match applied {
                    Some(applied) => Some(CommitCounts {
                        applied: applied.max(0) as usize,
                        skipped_duplicates: count_col(row, 9)?,
                        rejected: count_col(row, 10)?,
                    }),
                    None => None,
                };
                Ok(ImportBatch {
                    id: row.get(0)?,
                    file_name: row.get(1)?,
                    status: parsed_col::<BatchStatus>(row, 2)?,
                    created_at: instant_col(row, 3)?,
                    closed_at: opt_instant_col(row, 4)?,
                    total_rows: count_col(row, 5)?,
                    duplicates: count_col(row, 6)?,
                    invalid: count_col(row, 7)?,
                    outcome,
                    records: Vec::new(),
                    exclusions: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut batch) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT seq, fingerprint, record, warnings FROM staged_records
         WHERE batch_id = ? ORDER BY seq",
    )?;
    batch.records = stmt
        .query_map([id], |row| {
            Ok(StagedRecord {
                position: count_col(row, 0)?,
                fingerprint: Fingerprint::from_hex(row.get::<_, String>(1)?),
                record: json_col(row, 2)?,
                warnings: json_col(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT source_row, kind, fingerprint, messages FROM staged_exclusions
         WHERE batch_id = ? ORDER BY source_row",
    )?;
    batch.exclusions = stmt
        .query_map([id], |row| {
            let fingerprint: Option<String> = row.get(2)?;
            Ok(Exclusion {
                row: count_col(row, 0)?,
                kind: parsed_col::<ExclusionKind>(row, 1)?,
                fingerprint: fingerprint.map(Fingerprint::from_hex),
                messages: json_col(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(batch))
}

/// Move a batch to a terminal status and consume its staged records.
pub fn close_batch(
    conn: &Connection,
    id: i64,
    status: BatchStatus,
    closed_at: DateTime<Utc>,
    outcome: Option<CommitCounts>,
) -> Result<(), StoreError> {
    let (applied, skipped, rejected) = match outcome {
        Some(c) => (
            Some(c.applied as i64),
            Some(c.skipped_duplicates as i64),
            Some(c.rejected as i64),
        ),
        None => (None, None, None),
    };
    let n = conn.execute(
        "UPDATE import_batches
         SET status = ?, closed_at = ?, applied = ?, skipped_duplicates = ?, rejected = ?
         WHERE id = ?",
        params![status.as_str(), closed_at.to_rfc3339(), applied, skipped, rejected, id],
    )?;
    if n == 0 {
        return Err(StoreError::NoResults);
    }
    conn.execute("DELETE FROM staged_records WHERE batch_id = ?", [id])?;
    Ok(())
}

// ── Fingerprint history ──

/// Every fingerprint committed so far.
pub fn seen_fingerprints(conn: &Connection) -> Result<HashSet<Fingerprint>, StoreError> {
    let mut stmt = conn.prepare("SELECT fingerprint FROM movement_history")?;
    let seen = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .map(|r| r.map(Fingerprint::from_hex))
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(seen)
}

pub fn record_history(
    conn: &Connection,
    fingerprint: &Fingerprint,
    batch_id: i64,
    row: usize,
    committed_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO movement_history (fingerprint, batch_id, source_row, committed_at)
         VALUES (?, ?, ?, ?)",
        params![fingerprint.as_str(), batch_id, row as i64, committed_at.to_rfc3339()],
    )?;
    Ok(())
}

// ── Audit log ──

const LOG_COLS: &str = "id, kind, recorded_at, batch_id, header_id, item_id, contract_number, \
     action, asset, client_code, transaction_type, CAST(movement_date AS VARCHAR), fingerprint, \
     detail";

fn log_from_row(row: &Row<'_>) -> duckdb::Result<LogEntry> {
    let transaction: Option<String> = row.get(10)?;
    let fingerprint: Option<String> = row.get(12)?;
    Ok(LogEntry {
        id: row.get(0)?,
        kind: parsed_col::<LogKind>(row, 1)?,
        recorded_at: instant_col(row, 2)?,
        batch_id: row.get(3)?,
        header_id: row.get(4)?,
        item_id: row.get(5)?,
        contract_number: row.get(6)?,
        action: parsed_col::<AuditAction>(row, 7)?,
        asset: row.get(8)?,
        client_code: row.get(9)?,
        transaction: transaction
            .map(|t| {
                t.parse::<TransactionType>()
                    .map_err(|e| conversion_error(10, e))
            })
            .transpose()?,
        movement_date: opt_date_col(row, 11)?,
        fingerprint: fingerprint.map(Fingerprint::from_hex),
        detail: json_col(row, 13)?,
    })
}

/// Append one audit entry. Returns its id.
pub fn insert_log(conn: &Connection, entry: &LogEntry) -> Result<i64, StoreError> {
    let id: i64 = conn.query_row(
        "INSERT INTO audit_log
            (kind, recorded_at, batch_id, header_id, item_id, contract_number, action,
             asset, client_code, transaction_type, movement_date, fingerprint, detail)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS DATE), ?, ?)
         RETURNING id",
        params![
            entry.kind.as_str(),
            entry.recorded_at.to_rfc3339(),
            entry.batch_id,
            entry.header_id,
            entry.item_id,
            entry.contract_number,
            entry.action.as_str(),
            entry.asset,
            entry.client_code,
            entry.transaction.map(|t| t.as_str()),
            iso(entry.movement_date),
            entry.fingerprint.as_ref().map(|f| f.as_str().to_string()),
            serde_json::to_string(&entry.detail)?,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Most recent audit entries first, optionally filtered by kind and contract.
pub fn list_logs(
    conn: &Connection,
    kind: Option<LogKind>,
    contract_number: Option<&str>,
    limit: usize,
) -> Result<Vec<LogEntry>, StoreError> {
    let mut clauses = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(kind) = kind {
        clauses.push("kind = ?");
        args.push(kind.as_str().to_string());
    }
    if let Some(contract) = contract_number {
        clauses.push("contract_number = ?");
        args.push(contract.trim().to_string());
    }
    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT {LOG_COLS} FROM audit_log {filter} ORDER BY id DESC LIMIT {limit}");
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params_from_iter(args.iter()), log_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
