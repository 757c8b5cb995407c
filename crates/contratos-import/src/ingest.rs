//! Ingestion: delimited bytes → raw rows → validated movement records.
//!
//! Column names are normalised and resolved through alias lists, so both
//! `Contrato Nº` and `contrato_num` land on the contract number. Values are
//! looked up per row through the same lists: the first alias with a non-blank
//! value wins (e.g. `ativo` falls back to `serial`).

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use contratos_core::parse::{fold_ascii, normalize_column, parse_date, parse_money};
use contratos_core::{Exclusion, ExclusionKind, ItemDetails, MovementRecord, TransactionType};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::ImportError;

/// Column alias lists, already in normalised form.
pub mod aliases {
    pub const CONTRACT: &[&str] = &[
        "contrato_num",
        "contrato_n",
        "contrato",
        "n_contrato",
        "no_contrato",
        "numero_contrato",
        "num_contrato",
    ];
    pub const CLIENT_CODE: &[&str] = &[
        "cod_cli",
        "codigo_cliente",
        "cod_cliente",
        "client_code",
        "cliente",
    ];
    pub const CLIENT_NAME: &[&str] = &["nome_cli", "nome_cliente", "razao_social", "client_name"];
    pub const ASSET: &[&str] = &[
        "ativo",
        "patrimonio",
        "equipamento",
        "asset",
        "serial",
        "numero_serie",
        "n_serie",
    ];
    pub const SERIAL: &[&str] = &["serial", "numero_serie", "n_serie", "n_de_serie"];
    pub const TRANSACTION: &[&str] = &["tp_transacao", "tipo", "tipo_movimento", "transacao"];
    pub const DATE: &[&str] = &["data_mov", "data", "data_movimento", "data_movimentacao"];
    pub const PRODUCT_CODE: &[&str] = &["cod_pro", "codigo_produto", "cod_produto"];
    pub const DESCRIPTION: &[&str] = &[
        "descricao_produto",
        "descricao",
        "descricao_item",
        "item",
    ];
    pub const MONTHLY_VALUE: &[&str] = &[
        "valor_mensal",
        "valor_mensal_item",
        "vl_mensal",
        "valor_unitario",
        "valor",
    ];
    pub const REPLACEMENT: &[&str] = &["ativo_novo", "novo_ativo", "serial_novo"];
    pub const SERVICE_ORDER: &[&str] = &["os", "n_os", "num_os", "numero_os", "ordem_servico", "os_num"];
    pub const EXCHANGE_ROLE: &[&str] = &[
        "tipo_movimento_troca",
        "tp_movimento_troca",
        "tipo_mov_troca",
        "mov_troca",
        "tipo_troca",
        "papel_troca",
    ];
}

// ── Raw rows ──

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line index after the header line. Blank lines count, so
    /// `row + header line` is the line in the file.
    pub row: usize,
    fields: HashMap<String, String>,
}

impl RawRow {
    /// First non-blank value among `aliases`.
    pub fn pick(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|a| self.fields.get(*a))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Normalised column names, in file order.
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl Table {
    pub fn has_any(&self, aliases: &[&str]) -> bool {
        aliases.iter().any(|a| self.columns.iter().any(|c| c == a))
    }

    /// Fail with [`ImportError::MissingColumn`] unless some alias is present.
    pub fn require(&self, name: &'static str, aliases: &[&str]) -> Result<(), ImportError> {
        if self.has_any(aliases) {
            Ok(())
        } else {
            Err(ImportError::MissingColumn(name))
        }
    }
}

/// UTF-8 (BOM stripped), falling back to Latin-1 for legacy spreadsheet exports.
fn decode(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s.trim_start_matches('\u{feff}')),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Pick the delimiter that occurs most often in the header line.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    [b',', b';', b'\t', b'|']
        .into_iter()
        .map(|d| (d, header_line.bytes().filter(|b| *b == d).count()))
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// 1-based file line of a record that follows line `prev`. The reader stamps
/// each record with the position where the previous one ended, which can sit
/// on blank lines it skipped or on the tail of a CRLF, so step past those.
fn record_line(lines: &[&str], record: &StringRecord, prev: usize) -> usize {
    let stamped = record.position().map_or(0, |p| p.line() as usize);
    let mut line = stamped.max(prev + 1);
    while lines.get(line - 1).is_some_and(|l| l.is_empty()) {
        line += 1;
    }
    line
}

/// Read delimited bytes into normalised raw rows. Blank lines are skipped
/// but still counted in row numbers.
pub fn read_table(bytes: &[u8]) -> Result<Table, ImportError> {
    let text = decode(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let header_idx = lines.iter().position(|l| !l.is_empty()).unwrap_or(0);
    let header_line = lines.get(header_idx).copied().unwrap_or_default();
    let delimiter = sniff_delimiter(header_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(normalize_column).collect();
    let mut rows = Vec::new();
    let header_line_no = header_idx + 1;
    let mut prev = header_line_no;
    for record in reader.records() {
        let record = record?;
        let line = record_line(&lines, &record, prev);
        prev = line;
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }
        let row = line - header_line_no;
        let fields = columns
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        rows.push(RawRow { row, fields });
    }
    let shown = (delimiter as char).escape_default().to_string();
    debug!(
        delimiter = %shown,
        columns = columns.len(),
        rows = rows.len(),
        "read table"
    );
    Ok(Table { columns, rows })
}

// ── Movement records ──

/// Which side of a two-line exchange a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeRole {
    /// The asset going out to the client.
    New,
    /// The asset coming back.
    Old,
}

fn parse_role(raw: &str) -> Option<ExchangeRole> {
    match fold_ascii(raw).as_str() {
        "envio" | "e" | "novo" | "nova" => Some(ExchangeRole::New),
        "retorno" | "r" | "devolucao" | "antigo" | "old" => Some(ExchangeRole::Old),
        _ => None,
    }
}

#[derive(Debug)]
struct Draft {
    record: MovementRecord,
    role: Option<ExchangeRole>,
}

/// Outcome of parsing a movement file.
#[derive(Debug, Default)]
pub struct Parsed {
    pub total_rows: usize,
    /// Valid records in file order. Paired exchanges appear once.
    pub records: Vec<MovementRecord>,
    pub invalid: Vec<Exclusion>,
}

fn invalid(row: usize, messages: Vec<String>) -> Exclusion {
    Exclusion {
        row,
        kind: ExclusionKind::Invalid,
        fingerprint: None,
        messages,
    }
}

fn draft_row(raw: &RawRow) -> Result<Draft, Vec<String>> {
    let mut errors = Vec::new();

    let contract = raw.pick(aliases::CONTRACT);
    if contract.is_none() {
        errors.push("missing contract number".to_string());
    }
    let client = raw.pick(aliases::CLIENT_CODE);
    if client.is_none() {
        errors.push("missing client code".to_string());
    }
    let asset = raw.pick(aliases::ASSET);
    if asset.is_none() {
        errors.push("missing asset".to_string());
    }
    let transaction = match raw.pick(aliases::TRANSACTION) {
        None => {
            errors.push("missing transaction type".to_string());
            None
        }
        Some(t) => t.parse::<TransactionType>().map_err(|e| errors.push(e.to_string())).ok(),
    };
    let date = match raw.pick(aliases::DATE) {
        None => {
            errors.push("missing movement date".to_string());
            None
        }
        Some(d) => parse_date(d).map_err(|e| errors.push(e.to_string())).ok(),
    };
    let monthly_value = match raw.pick(aliases::MONTHLY_VALUE) {
        None => None,
        Some(v) => parse_money(v).map_err(|e| errors.push(e.to_string())).ok().flatten(),
    };

    let role = match (transaction, raw.pick(aliases::EXCHANGE_ROLE)) {
        (Some(TransactionType::Troca), Some(r)) => match parse_role(r) {
            Some(role) => Some(role),
            None => {
                errors.push(format!("invalid exchange role {r:?} (use ENVIO or RETORNO)"));
                None
            }
        },
        _ => None,
    };
    let service_order = raw.pick(aliases::SERVICE_ORDER).map(str::to_string);
    let replacement = match transaction {
        Some(TransactionType::Troca) => raw.pick(aliases::REPLACEMENT).map(str::to_string),
        _ => None,
    };
    // A single-line exchange already names its replacement.
    let role = role.filter(|_| replacement.is_none());
    if role.is_some() && replacement.is_none() && service_order.is_none() {
        errors.push("two-line exchange needs a service order number (os)".to_string());
    }

    let (Some(contract), Some(client), Some(asset), Some(transaction), Some(date)) =
        (contract, client, asset, transaction, date)
    else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let text = |aliases: &[&str]| raw.pick(aliases).map(str::to_string);
    Ok(Draft {
        record: MovementRecord {
            row: raw.row,
            contract_number: contract.to_string(),
            client_code: client.to_string(),
            asset: asset.to_string(),
            transaction,
            movement_date: date,
            replacement_asset: replacement.filter(|r| r != asset),
            service_order,
            details: ItemDetails {
                client_name: text(aliases::CLIENT_NAME),
                serial: text(aliases::SERIAL),
                product_code: text(aliases::PRODUCT_CODE),
                description: text(aliases::DESCRIPTION),
                monthly_value,
            },
        },
        role,
    })
}

/// Merge a return row and a shipment row of the same service order into one exchange.
fn merge_exchange(old: MovementRecord, new: MovementRecord) -> MovementRecord {
    let replacement = (new.asset != old.asset).then(|| new.asset.clone());
    let ItemDetails {
        client_name,
        serial,
        product_code,
        description,
        monthly_value,
    } = new.details;
    MovementRecord {
        replacement_asset: replacement,
        details: ItemDetails {
            client_name: client_name.or(old.details.client_name),
            serial,
            product_code: product_code.or(old.details.product_code),
            description: description.or(old.details.description),
            monthly_value: monthly_value.or(old.details.monthly_value),
        },
        ..old
    }
}

/// Parse and validate every row. Structural problems (no data, a required
/// column absent) fail the whole file; row problems become exclusions.
pub fn parse_movements(bytes: &[u8]) -> Result<Parsed, ImportError> {
    let table = read_table(bytes)?;
    if table.rows.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    table.require("contrato_num", aliases::CONTRACT)?;
    table.require("cod_cli", aliases::CLIENT_CODE)?;
    table.require("ativo", aliases::ASSET)?;
    table.require("tp_transacao", aliases::TRANSACTION)?;
    table.require("data_mov", aliases::DATE)?;

    let mut parsed = Parsed {
        total_rows: table.rows.len(),
        ..Parsed::default()
    };
    let mut pending: BTreeMap<(String, String, String), Vec<Draft>> = BTreeMap::new();

    for raw in &table.rows {
        match draft_row(raw) {
            Err(messages) => parsed.invalid.push(invalid(raw.row, messages)),
            Ok(draft) if draft.role.is_some() => {
                let rec = &draft.record;
                let key = (
                    rec.contract_number.clone(),
                    rec.client_code.clone(),
                    rec.service_order.clone().unwrap_or_default(),
                );
                pending.entry(key).or_default().push(draft);
            }
            Ok(draft) => parsed.records.push(draft.record),
        }
    }

    for ((_, _, os), drafts) in pending {
        let (news, olds): (Vec<_>, Vec<_>) = drafts
            .into_iter()
            .partition(|d| d.role == Some(ExchangeRole::New));
        match (news.len(), olds.len()) {
            (1, 1) => {
                let new = news.into_iter().map(|d| d.record).next();
                let old = olds.into_iter().map(|d| d.record).next();
                if let (Some(new), Some(old)) = (new, old) {
                    parsed.records.push(merge_exchange(old, new));
                }
            }
            (n, o) => {
                let message = if n > 1 || o > 1 {
                    format!("duplicated exchange role for service order {os}")
                } else {
                    format!("unpaired exchange row for service order {os}")
                };
                for d in news.into_iter().chain(olds) {
                    parsed.invalid.push(invalid(d.record.row, vec![message.clone()]));
                }
            }
        }
    }

    parsed.records.sort_by_key(|r| r.row);
    parsed.invalid.sort_by_key(|e| e.row);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sniffs_delimiters() {
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a;b;c"), b';');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("a|b|c"), b'|');
        assert_eq!(sniff_delimiter("single"), b',');
        // Semicolon files often carry commas inside names.
        assert_eq!(sniff_delimiter("Contrato;Nome, Cliente;Ativo"), b';');
    }

    #[test]
    fn reads_normalised_columns_and_skips_blank_lines() {
        let csv = "\u{feff}Contrato Num;Cód Cli;Ativo\n123;001;A1\n;;\n124;002;A2\n";
        let table = read_table(csv.as_bytes()).unwrap();
        assert_eq!(table.columns, vec!["contrato_num", "cod_cli", "ativo"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row, 1);
        assert_eq!(table.rows[1].row, 3);
        assert_eq!(table.rows[1].pick(aliases::ASSET), Some("A2"));
    }

    #[test]
    fn row_numbers_follow_file_lines_across_blank_lines() {
        let csv = "\ncontrato;cod_cli;ativo\n123;001;A1\n\n\n124;002;A2\r\n\r\n125;003;A3\n";
        let table = read_table(csv.as_bytes()).unwrap();
        let rows: Vec<_> = table.rows.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![1, 4, 6]);
        assert_eq!(table.rows[1].pick(aliases::ASSET), Some("A2"));
    }

    #[test]
    fn latin1_fallback() {
        let mut bytes = b"contrato,cod_cli,descri".to_vec();
        bytes.extend([0xe7, 0xe3, b'o']); // "ção" in Latin-1
        bytes.extend(b"\n1,2,x\n");
        let table = read_table(&bytes).unwrap();
        assert_eq!(table.columns[2], "descricao");
    }

    #[test]
    fn asset_falls_back_to_serial_per_row() {
        let csv = "contrato,cod_cli,ativo,serial,tp_transacao,data_mov\n\
                   123,001,,SN9,E,01/08/2025\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        let rec = &parsed.records[0];
        assert_eq!(rec.asset, "SN9");
        assert_eq!(rec.details.serial.as_deref(), Some("SN9"));
        assert_eq!(rec.transaction, TransactionType::Envio);
        assert_eq!(rec.movement_date, ymd(2025, 8, 1));
    }

    #[test]
    fn parses_details_and_money() {
        let csv = "contrato_num;cod_cli;nome_cli;ativo;cod_pro;descricao_produto;valor_mensal;tp_transacao;data_mov\n\
                   123;001;ACME;A1;P-10;Impressora;1.234,56;ENVIO;2025-08-01\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        let d = &parsed.records[0].details;
        assert_eq!(d.client_name.as_deref(), Some("ACME"));
        assert_eq!(d.product_code.as_deref(), Some("P-10"));
        assert_eq!(d.description.as_deref(), Some("Impressora"));
        assert_eq!(d.monthly_value, Some(1234.56));
    }

    #[test]
    fn invalid_rows_reported_with_all_reasons() {
        let csv = "contrato,cod_cli,ativo,tp_transacao,data_mov,valor_mensal\n\
                   123,001,A1,VENDA,01/08/2025,10\n\
                   ,001,A1,E,ontem,abc\n\
                   123,001,A2,E,2025-08-01,\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        assert_eq!(parsed.total_rows, 3);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].row, 3);
        assert_eq!(parsed.invalid.len(), 2);
        assert_eq!(parsed.invalid[0].row, 1);
        assert!(parsed.invalid[0].messages[0].contains("VENDA"));
        assert_eq!(parsed.invalid[1].row, 2);
        assert_eq!(parsed.invalid[1].messages.len(), 3);
        assert!(parsed.invalid.iter().all(|e| e.kind == ExclusionKind::Invalid));
    }

    #[test]
    fn missing_column_fails_file() {
        let csv = "contrato,cod_cli,tp_transacao,data_mov\n123,001,E,2025-08-01\n";
        let err = parse_movements(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn("ativo")));
    }

    #[test]
    fn empty_file_rejected() {
        let err = parse_movements(b"contrato,cod_cli,ativo,tp_transacao,data_mov\n").unwrap_err();
        assert!(matches!(err, ImportError::EmptyFile));
    }

    #[test]
    fn single_line_exchange_keeps_replacement() {
        let csv = "contrato,cod_cli,ativo,ativo_novo,tp_transacao,data_mov\n\
                   123,001,A1,B1,TROCA,2025-08-05\n\
                   123,001,A2,A2,T,2025-08-05\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        assert_eq!(parsed.records[0].replacement_asset.as_deref(), Some("B1"));
        assert_eq!(parsed.records[0].shipped_asset(), "B1");
        // Same asset going back out is not a replacement.
        assert_eq!(parsed.records[1].replacement_asset, None);
    }

    #[test]
    fn two_line_exchange_is_paired_by_service_order() {
        let csv = "contrato,cod_cli,ativo,tp_transacao,data_mov,os,tipo_movimento_troca,valor_mensal\n\
                   123,001,A1,E,2025-08-01,,,100\n\
                   123,001,NEW1,TROCA,2025-08-06,OS-7,ENVIO,120\n\
                   123,001,OLD1,TROCA,2025-08-05,OS-7,RETORNO,\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        assert!(parsed.invalid.is_empty(), "{:?}", parsed.invalid);
        assert_eq!(parsed.records.len(), 2);
        let troca = &parsed.records[1];
        assert_eq!(troca.row, 3);
        assert_eq!(troca.transaction, TransactionType::Troca);
        assert_eq!(troca.asset, "OLD1");
        assert_eq!(troca.replacement_asset.as_deref(), Some("NEW1"));
        assert_eq!(troca.movement_date, ymd(2025, 8, 5));
        assert_eq!(troca.service_order.as_deref(), Some("OS-7"));
        assert_eq!(troca.details.monthly_value, Some(120.0));
    }

    #[test]
    fn unpaired_and_duplicated_exchange_rows_are_invalid() {
        let csv = "contrato,cod_cli,ativo,tp_transacao,data_mov,os,tipo_troca\n\
                   123,001,NEW1,TROCA,2025-08-06,OS-1,NOVO\n\
                   123,001,NEW2,TROCA,2025-08-06,OS-2,ENVIO\n\
                   123,001,NEW3,TROCA,2025-08-06,OS-2,E\n\
                   123,001,OLD2,TROCA,2025-08-06,OS-2,R\n\
                   123,001,X,TROCA,2025-08-06,OS-3,talvez\n\
                   123,001,Y,TROCA,2025-08-06,,ANTIGO\n";
        let parsed = parse_movements(csv.as_bytes()).unwrap();
        assert!(parsed.records.is_empty());
        let rows: Vec<_> = parsed.invalid.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![1, 2, 3, 4, 5, 6]);
        assert!(parsed.invalid[0].messages[0].contains("unpaired"));
        assert!(parsed.invalid[1].messages[0].contains("duplicated"));
        assert!(parsed.invalid[4].messages[0].contains("exchange role"));
        assert!(parsed.invalid[5].messages[0].contains("service order"));
    }
}
