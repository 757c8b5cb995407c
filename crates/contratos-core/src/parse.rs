//! Lenient parsing of spreadsheet values: dates, Brazilian money, rates, column names.

use chrono::{Days, NaiveDate};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("missing required field: {0}")]
    Missing(&'static str),

    #[error("invalid date: {0:?}")]
    InvalidDate(String),

    #[error("invalid monetary value: {0:?}")]
    InvalidMoney(String),

    #[error("invalid transaction type {0:?} (use ENVIO, RETORNO or TROCA)")]
    InvalidTransaction(String),

    #[error("invalid {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Largest serial Excel accepts (9999-12-31).
const EXCEL_MAX_SERIAL: f64 = 2_958_465.0;

/// Lowercase and strip Portuguese diacritics.
pub fn fold_ascii(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Normalise a spreadsheet column header: `" Nº Contrato "` → `"no_contrato"`.
pub fn normalize_column(name: &str) -> String {
    let folded = fold_ascii(name.trim_start_matches('\u{feff}').trim());
    let mut out = String::with_capacity(folded.len());
    for c in folded.chars() {
        match c {
            ' ' | '-' | '.' | '/' => {
                if !out.ends_with('_') {
                    out.push('_');
                }
            }
            'º' | 'ª' => out.push('o'),
            c => out.push(c),
        }
    }
    out.trim_matches('_').to_string()
}

/// Parse a movement date.
///
/// Accepts `YYYY-MM-DD`, `DD/MM/YYYY`, `DD-MM-YYYY`, `YYYY/MM/DD`, `DD.MM.YYYY`
/// and Excel serial numbers (days since 1899-12-30, fractional part ignored).
pub fn parse_date(raw: &str) -> Result<NaiveDate, FieldError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(FieldError::InvalidDate(String::new()));
    }
    // Spreadsheet exports sometimes carry a midnight time component.
    let date_part = text.split([' ', 'T']).next().unwrap_or(text);
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, fmt) {
            return Ok(d);
        }
    }
    if let Ok(serial) = text.parse::<f64>()
        && serial >= 1.0
        && serial <= EXCEL_MAX_SERIAL
    {
        return excel_serial_to_date(serial as u64)
            .ok_or_else(|| FieldError::InvalidDate(text.to_string()));
    }
    Err(FieldError::InvalidDate(text.to_string()))
}

fn excel_serial_to_date(days: u64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(days))
}

/// Parse a monetary amount. Blank input is `Ok(None)`.
///
/// The rightmost of `,`/`.` is taken as the decimal separator, so both
/// `1.234,56` and `1,234.56` read as 1234.56; a lone comma is decimal.
pub fn parse_money(raw: &str) -> Result<Option<f64>, FieldError> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized
        .parse::<f64>()
        .map(Some)
        .map_err(|_| FieldError::InvalidMoney(raw.trim().to_string()))
}

/// Annual adjustment rate from free text: `"6%"`, `"6"` and `"0,06"` all give
/// 0.06. Values above 1 are read as percentages. Named indexes without a
/// numeric value (`"IPCA"`) and blanks give 0.
pub fn parse_annual_rate(index: &str) -> f64 {
    let s: String = index
        .trim()
        .chars()
        .filter(|c| *c != '%' && !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 1.0 => v / 100.0,
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Parse a whole number of months, tolerating `"12"`, `"12,0"` and `"12 meses"`.
pub fn parse_months(raw: &str) -> Result<i32, FieldError> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    digits
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.trunc() as i32)
        .ok_or_else(|| FieldError::Invalid {
            field: "term_months",
            value: raw.trim().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_formats() {
        assert_eq!(parse_date("2025-08-01").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("01/08/2025").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("01-08-2025").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("2025/08/01").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("01.08.2025").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date(" 2025-08-01 00:00:00 ").unwrap(), ymd(2025, 8, 1));
    }

    #[test]
    fn excel_serial_dates() {
        assert_eq!(parse_date("45870").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("45870.0").unwrap(), ymd(2025, 8, 1));
        assert_eq!(parse_date("1").unwrap(), ymd(1899, 12, 31));
    }

    #[test]
    fn bad_dates_rejected() {
        assert!(parse_date("").is_err());
        assert!(parse_date("31/02/2025").is_err());
        assert!(parse_date("ontem").is_err());
        assert!(parse_date("-5").is_err());
    }

    #[test]
    fn money_formats() {
        assert_eq!(parse_money("1.234,56").unwrap(), Some(1234.56));
        assert_eq!(parse_money("1,234.56").unwrap(), Some(1234.56));
        assert_eq!(parse_money("1234,5").unwrap(), Some(1234.5));
        assert_eq!(parse_money("R$ 99,90").unwrap(), Some(99.9));
        assert_eq!(parse_money("150").unwrap(), Some(150.0));
        assert_eq!(parse_money("  ").unwrap(), None);
        assert!(parse_money("abc").is_err());
    }

    #[test]
    fn annual_rates() {
        assert!((parse_annual_rate("6%") - 0.06).abs() < 1e-12);
        assert!((parse_annual_rate("6") - 0.06).abs() < 1e-12);
        assert!((parse_annual_rate("0,06") - 0.06).abs() < 1e-12);
        assert!((parse_annual_rate(" 4,5 % ") - 0.045).abs() < 1e-12);
        assert_eq!(parse_annual_rate("IPCA"), 0.0);
        assert_eq!(parse_annual_rate(""), 0.0);
    }

    #[test]
    fn months() {
        assert_eq!(parse_months("12").unwrap(), 12);
        assert_eq!(parse_months("36,0").unwrap(), 36);
        assert_eq!(parse_months("24 meses").unwrap(), 24);
        assert!(parse_months("doze").is_err());
    }

    #[test]
    fn column_names() {
        assert_eq!(normalize_column(" Contrato Num "), "contrato_num");
        assert_eq!(normalize_column("Código-Cliente"), "codigo_cliente");
        assert_eq!(normalize_column("\u{feff}tp_transacao"), "tp_transacao");
        assert_eq!(normalize_column("Tipo de Movimento Troca"), "tipo_de_movimento_troca");
        assert_eq!(normalize_column("Descrição do Produto"), "descricao_do_produto");
    }

    #[test]
    fn folding() {
        assert_eq!(fold_ascii("DEVOLUÇÃO"), "devolucao");
        assert_eq!(fold_ascii("Índice"), "indice");
    }
}
