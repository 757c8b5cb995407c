//! Contract header registration, editing and bulk import.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use contratos_core::parse::{parse_date, parse_months};
use contratos_core::{
    AuditAction, ContractHeader, Exclusion, ExclusionKind, FieldError, HeaderMeta, LogEntry,
};
use contratos_store::{Connection, rows};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::ImportError;
use crate::ingest::{self, RawRow};
use crate::recompute::recompute_header;

mod aliases {
    pub use crate::ingest::aliases::{CLIENT_CODE, CONTRACT};

    pub const CLIENT_NAME: &[&str] = &[
        "nome_cli",
        "nome_cliente",
        "razao_social",
        "client_name",
        "nome",
    ];
    pub const CNPJ: &[&str] = &["cnpj", "cnpj_cpf", "documento", "cpf_cnpj"];
    pub const TERM: &[&str] = &[
        "periodo_contratual",
        "periodo_contratual_meses",
        "prazo",
        "prazo_meses",
        "meses",
        "term_months",
    ];
    pub const INDEX: &[&str] = &[
        "indice_reajuste",
        "indice_reajuste_anual",
        "reajuste",
        "indice",
        "taxa",
        "adjustment_index",
    ];
    pub const SELLER: &[&str] = &["vendedor", "consultor", "representante", "seller"];
    pub const START_DATE: &[&str] = &[
        "data_inicio",
        "inicio",
        "data_inicio_contrato",
        "start_date",
    ];
}

/// What to do when a bulk-imported contract number is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Skip,
    Update,
    Error,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Update => "update",
            Self::Error => "error",
        })
    }
}

impl FromStr for DuplicatePolicy {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "update" => Ok(Self::Update),
            "error" => Ok(Self::Error),
            other => Err(FieldError::Invalid {
                field: "on_duplicate",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderImportReport {
    pub total_rows: usize,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub invalid: Vec<Exclusion>,
}

fn check_registrable(meta: &HeaderMeta) -> Result<(), ImportError> {
    let mut missing = Vec::new();
    if meta.contract_number.is_empty() {
        missing.push("contract_number");
    }
    if meta.client_name.is_empty() {
        missing.push("client_name");
    }
    if !missing.is_empty() {
        return Err(ImportError::InvalidHeader(format!("missing {}", missing.join(", "))));
    }
    if meta.term_months < 0 {
        return Err(ImportError::InvalidHeader("term_months must not be negative".into()));
    }
    Ok(())
}

fn aggregates_detail(header: &ContractHeader, items: usize) -> serde_json::Value {
    json!({
        "months_remaining": header.aggregates.months_remaining,
        "global_value": header.aggregates.global_value,
        "present_value": header.aggregates.present_value,
        "items": items,
    })
}

fn changed_fields(before: &HeaderMeta, after: &HeaderMeta) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if before.client_code != after.client_code {
        changed.push("client_code");
    }
    if before.client_name != after.client_name {
        changed.push("client_name");
    }
    if before.cnpj != after.cnpj {
        changed.push("cnpj");
    }
    if before.term_months != after.term_months {
        changed.push("term_months");
    }
    if before.adjustment_index != after.adjustment_index {
        changed.push("adjustment_index");
    }
    if before.seller != after.seller {
        changed.push("seller");
    }
    if before.start_date != after.start_date {
        changed.push("start_date");
    }
    changed
}

/// Register a new header. Only the contract number and client name are
/// required here; the full check runs when movements touch the header.
pub fn register(
    conn: &Connection,
    meta: HeaderMeta,
    today: NaiveDate,
) -> Result<(ContractHeader, LogEntry), ImportError> {
    let meta = meta.normalized();
    check_registrable(&meta)?;
    if rows::find_header(conn, &meta.contract_number)?.is_some() {
        return Err(ImportError::DuplicateHeader(meta.contract_number));
    }
    let id = rows::insert_header(conn, &meta)?;
    let (header, items) = recompute_header(conn, id, today)?;

    let mut entry = LogEntry::new(AuditAction::HeaderCreated, &header.meta.contract_number)
        .with_header(id)
        .with_detail(aggregates_detail(&header, items));
    entry.client_code = header.meta.client_code.clone();
    entry.id = Some(rows::insert_log(conn, &entry)?);
    info!(contract = %header.meta.contract_number, "header registered");
    Ok((header, entry))
}

/// Replace a header's metadata and recompute its figures. The contract
/// number itself never changes.
pub fn edit(
    conn: &Connection,
    contract_number: &str,
    meta: HeaderMeta,
    today: NaiveDate,
) -> Result<(ContractHeader, LogEntry), ImportError> {
    let current = rows::find_header(conn, contract_number)?
        .ok_or_else(|| ImportError::ContractNotFound(contract_number.trim().to_string()))?;
    let meta = HeaderMeta {
        contract_number: current.meta.contract_number.clone(),
        ..meta
    }
    .normalized();
    check_registrable(&meta)?;

    rows::update_header_meta(conn, current.id, &meta)?;
    let (header, items) = recompute_header(conn, current.id, today)?;

    let mut detail = aggregates_detail(&header, items);
    detail["changed"] = json!(changed_fields(&current.meta, &header.meta));
    let mut entry = LogEntry::new(AuditAction::HeaderUpdated, &header.meta.contract_number)
        .with_header(header.id)
        .with_detail(detail);
    entry.client_code = header.meta.client_code.clone();
    entry.id = Some(rows::insert_log(conn, &entry)?);
    info!(contract = %header.meta.contract_number, "header updated");
    Ok((header, entry))
}

fn header_row(raw: &RawRow) -> Result<HeaderMeta, Vec<String>> {
    let mut errors = Vec::new();
    let text = |a: &[&str]| raw.pick(a).unwrap_or_default().to_string();

    let contract_number = text(aliases::CONTRACT);
    if contract_number.is_empty() {
        errors.push("missing contract number".to_string());
    }
    let client_name = text(aliases::CLIENT_NAME);
    if client_name.is_empty() {
        errors.push("missing client name".to_string());
    }
    let term_months = match raw.pick(aliases::TERM) {
        None => 0,
        Some(v) => parse_months(v).unwrap_or_else(|e| {
            errors.push(e.to_string());
            0
        }),
    };
    let start_date = match raw.pick(aliases::START_DATE) {
        None => None,
        Some(v) => parse_date(v).map_err(|e| errors.push(e.to_string())).ok(),
    };
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(HeaderMeta {
        contract_number,
        client_code: raw.pick(aliases::CLIENT_CODE).map(str::to_string),
        client_name,
        cnpj: text(aliases::CNPJ),
        term_months,
        adjustment_index: text(aliases::INDEX),
        seller: text(aliases::SELLER),
        start_date,
    })
}

/// Bulk-register headers from a delimited file.
///
/// Invalid rows are reported and skipped. A duplicate under
/// [`DuplicatePolicy::Error`] fails the whole import.
pub fn import(
    conn: &Connection,
    bytes: &[u8],
    policy: DuplicatePolicy,
    today: NaiveDate,
) -> Result<(HeaderImportReport, Vec<LogEntry>), ImportError> {
    let table = ingest::read_table(bytes)?;
    if table.rows.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    table.require("contrato_num", aliases::CONTRACT)?;
    table.require("nome_cli", aliases::CLIENT_NAME)?;

    let mut report = HeaderImportReport {
        total_rows: table.rows.len(),
        ..HeaderImportReport::default()
    };
    let mut entries = Vec::new();
    for raw in &table.rows {
        let meta = match header_row(raw) {
            Ok(meta) => meta.normalized(),
            Err(messages) => {
                report.invalid.push(Exclusion {
                    row: raw.row,
                    kind: ExclusionKind::Invalid,
                    fingerprint: None,
                    messages,
                });
                continue;
            }
        };
        let number = meta.contract_number.clone();
        if rows::find_header(conn, &number)?.is_some() {
            match policy {
                DuplicatePolicy::Skip => report.skipped.push(number),
                DuplicatePolicy::Error => return Err(ImportError::DuplicateHeader(number)),
                DuplicatePolicy::Update => {
                    let (_, entry) = edit(conn, &number, meta, today)?;
                    entries.push(entry);
                    report.updated.push(number);
                }
            }
        } else {
            let (_, entry) = register(conn, meta, today)?;
            entries.push(entry);
            report.created.push(number);
        }
    }
    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        invalid = report.invalid.len(),
        %policy,
        "header import finished"
    );
    Ok((report, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_core::LogKind;
    use contratos_store::DuckStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn meta(number: &str) -> HeaderMeta {
        HeaderMeta {
            contract_number: number.into(),
            client_name: "ACME".into(),
            cnpj: "1".into(),
            term_months: 12,
            seller: "Ana".into(),
            ..HeaderMeta::default()
        }
    }

    #[test]
    fn register_logs_creation() {
        let store = DuckStore::open().unwrap();
        let (header, entry) = register(store.connection(), meta(" 123 "), today()).unwrap();
        assert_eq!(header.meta.contract_number, "123");
        assert_eq!(entry.action, AuditAction::HeaderCreated);
        assert_eq!(entry.kind, LogKind::Header);
        assert!(entry.id.is_some());

        let err = register(store.connection(), meta("123"), today()).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateHeader(_)));
    }

    #[test]
    fn register_requires_number_and_name() {
        let store = DuckStore::open().unwrap();
        let err = register(
            store.connection(),
            HeaderMeta {
                client_name: " ".into(),
                ..meta("")
            },
            today(),
        )
        .unwrap_err();
        match err {
            ImportError::InvalidHeader(msg) => {
                assert!(msg.contains("contract_number"));
                assert!(msg.contains("client_name"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn edit_keeps_number_and_lists_changes() {
        let store = DuckStore::open().unwrap();
        register(store.connection(), meta("123"), today()).unwrap();
        let edited = HeaderMeta {
            contract_number: "999".into(),
            seller: "Bia".into(),
            term_months: 24,
            ..meta("123")
        };
        let (header, entry) = edit(store.connection(), "123", edited, today()).unwrap();
        assert_eq!(header.meta.contract_number, "123");
        assert_eq!(header.meta.term_months, 24);
        assert_eq!(entry.action, AuditAction::HeaderUpdated);
        assert_eq!(entry.detail["changed"], json!(["term_months", "seller"]));

        let err = edit(store.connection(), "404", meta("404"), today()).unwrap_err();
        assert!(matches!(err, ImportError::ContractNotFound(_)));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("UPDATE".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Update);
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Skip);
        assert!("merge".parse::<DuplicatePolicy>().is_err());
    }

    const FILE: &str = "Contrato;Nome Cliente;CNPJ;Prazo Meses;Índice Reajuste;Vendedor;Data Início\n\
                        100;ACME;1;12;6%;Ana;01/01/2025\n\
                        200;Beta;2;24 meses;IPCA;Bia;\n\
                        ;Sem número;3;12;;;\n";

    #[test]
    fn bulk_import_creates_and_reports_invalid() {
        let store = DuckStore::open().unwrap();
        let (report, entries) =
            import(store.connection(), FILE.as_bytes(), DuplicatePolicy::Skip, today()).unwrap();
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.created, vec!["100", "200"]);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].row, 3);
        assert_eq!(entries.len(), 2);

        let h = rows::find_header(store.connection(), "100").unwrap().unwrap();
        assert_eq!(h.meta.adjustment_index, "6%");
        assert_eq!(h.meta.start_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(h.aggregates.months_remaining, 5);
        let h = rows::find_header(store.connection(), "200").unwrap().unwrap();
        assert_eq!(h.meta.term_months, 24);
    }

    #[test]
    fn bulk_import_duplicate_policies() {
        let store = DuckStore::open().unwrap();
        let conn = store.connection();
        import(conn, FILE.as_bytes(), DuplicatePolicy::Skip, today()).unwrap();

        let (report, _) = import(conn, FILE.as_bytes(), DuplicatePolicy::Skip, today()).unwrap();
        assert_eq!(report.skipped, vec!["100", "200"]);
        assert!(report.created.is_empty());

        let (report, entries) =
            import(conn, FILE.as_bytes(), DuplicatePolicy::Update, today()).unwrap();
        assert_eq!(report.updated, vec!["100", "200"]);
        assert!(entries.iter().all(|e| e.action == AuditAction::HeaderUpdated));

        let err = import(conn, FILE.as_bytes(), DuplicatePolicy::Error, today()).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateHeader(n) if n == "100"));
    }
}
