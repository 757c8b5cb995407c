//! Contract headers, line items and the movement records that mutate them.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::parse::{FieldError, fold_ascii};

/// Movement type carried by each imported row (`tp_transacao`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Shipment: inserts or updates an item.
    Envio,
    /// Return: removes one item.
    Retorno,
    /// Exchange: return of one asset followed by shipment of its replacement.
    Troca,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Envio => "ENVIO",
            Self::Retorno => "RETORNO",
            Self::Troca => "TROCA",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = FieldError;

    /// Accepts the canonical names plus the short forms operators type into
    /// spreadsheets (`e`, `env`, `r`, `ret`, `t`, `trc`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_ascii(s.trim()).as_str() {
            "envio" | "env" | "e" => Ok(Self::Envio),
            "retorno" | "ret" | "r" => Ok(Self::Retorno),
            "troca" | "trc" | "t" => Ok(Self::Troca),
            _ => Err(FieldError::InvalidTransaction(s.trim().to_string())),
        }
    }
}

/// Lifecycle state of a contract item. Returned items stay in the table so the
/// audit trail keeps pointing at them; they no longer count as contract items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Active,
    Returned,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Returned => "RETURNED",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "RETURNED" => Ok(Self::Returned),
            other => Err(FieldError::Invalid {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Derived figures. Never edited by hand: always the output of
/// [`recalc::recompute`](crate::recalc::recompute).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    pub months_remaining: i32,
    pub global_value: f64,
    pub present_value: f64,
}

/// User-maintained header metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderMeta {
    pub contract_number: String,
    #[serde(default)]
    pub client_code: Option<String>,
    pub client_name: String,
    #[serde(default)]
    pub cnpj: String,
    #[serde(default)]
    pub term_months: i32,
    /// Annual adjustment index as typed by the user: `"6%"`, `"0,06"`, `"IPCA"`.
    #[serde(default)]
    pub adjustment_index: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

impl HeaderMeta {
    /// Names of the fields a header needs before movements may touch its items.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.contract_number.trim().is_empty() {
            missing.push("contract_number");
        }
        if self.client_name.trim().is_empty() {
            missing.push("client_name");
        }
        if self.cnpj.trim().is_empty() {
            missing.push("cnpj");
        }
        if self.term_months <= 0 {
            missing.push("term_months");
        }
        if self.seller.trim().is_empty() {
            missing.push("seller");
        }
        missing
    }

    pub fn is_valid(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Trim every text field; blank client codes become `None`.
    pub fn normalized(mut self) -> Self {
        self.contract_number = self.contract_number.trim().to_string();
        self.client_name = self.client_name.trim().to_string();
        self.cnpj = self.cnpj.trim().to_string();
        self.adjustment_index = self.adjustment_index.trim().to_string();
        self.seller = self.seller.trim().to_string();
        self.client_code = self
            .client_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }
}

/// A contract header as stored, metadata plus derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractHeader {
    pub id: i64,
    #[serde(flatten)]
    pub meta: HeaderMeta,
    #[serde(flatten)]
    pub aggregates: Derived,
}

/// Optional descriptive fields a movement row may carry for its item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_value: Option<f64>,
}

/// One contract line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractItem {
    pub id: i64,
    pub header_id: i64,
    pub contract_number: String,
    pub asset: String,
    pub client_code: String,
    pub client_name: Option<String>,
    pub serial: Option<String>,
    pub product_code: Option<String>,
    pub description: Option<String>,
    pub monthly_value: f64,
    pub shipped_on: NaiveDate,
    pub exchanged_on: Option<NaiveDate>,
    pub returned_on: Option<NaiveDate>,
    pub last_transaction: TransactionType,
    pub status: ItemStatus,
    pub fingerprint: Option<Fingerprint>,
    #[serde(flatten)]
    pub derived: Derived,
}

impl ContractItem {
    pub fn is_active(&self) -> bool {
        self.status == ItemStatus::Active
    }
}

/// One validated row of an imported movement file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// 1-based data row in the source file (the return side for paired exchanges).
    pub row: usize,
    pub contract_number: String,
    pub client_code: String,
    /// The asset shipped (ENVIO), returned (RETORNO) or exchanged out (TROCA).
    pub asset: String,
    pub transaction: TransactionType,
    pub movement_date: NaiveDate,
    /// TROCA only: asset shipped in place of `asset`. `None` means the same asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_asset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_order: Option<String>,
    #[serde(default)]
    pub details: ItemDetails,
}

impl MovementRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            &self.contract_number,
            &self.client_code,
            self.transaction,
            &self.asset,
            self.replacement_asset.as_deref().unwrap_or(""),
            self.movement_date,
        )
    }

    /// Asset that ends up active after this movement is applied.
    pub fn shipped_asset(&self) -> &str {
        match self.transaction {
            TransactionType::Troca => self.replacement_asset.as_deref().unwrap_or(&self.asset),
            _ => &self.asset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderMeta {
        HeaderMeta {
            contract_number: "123".into(),
            client_code: Some("001".into()),
            client_name: "ACME".into(),
            cnpj: "00.000.000/0001-00".into(),
            term_months: 12,
            adjustment_index: "6%".into(),
            seller: "Ana".into(),
            start_date: None,
        }
    }

    #[test]
    fn transaction_aliases() {
        assert_eq!("ENVIO".parse::<TransactionType>().unwrap(), TransactionType::Envio);
        assert_eq!(" env ".parse::<TransactionType>().unwrap(), TransactionType::Envio);
        assert_eq!("r".parse::<TransactionType>().unwrap(), TransactionType::Retorno);
        assert_eq!("Ret".parse::<TransactionType>().unwrap(), TransactionType::Retorno);
        assert_eq!("trc".parse::<TransactionType>().unwrap(), TransactionType::Troca);
        assert!("VENDA".parse::<TransactionType>().is_err());
        assert!("".parse::<TransactionType>().is_err());
    }

    #[test]
    fn transaction_serde_uses_canonical_names() {
        let json = serde_json::to_string(&TransactionType::Retorno).unwrap();
        assert_eq!(json, "\"RETORNO\"");
    }

    #[test]
    fn complete_header_is_valid() {
        assert!(header().is_valid());
    }

    #[test]
    fn header_missing_fields_listed() {
        let meta = HeaderMeta {
            cnpj: " ".into(),
            term_months: 0,
            seller: String::new(),
            ..header()
        };
        assert_eq!(meta.missing_fields(), vec!["cnpj", "term_months", "seller"]);
    }

    #[test]
    fn normalized_drops_blank_client_code() {
        let meta = HeaderMeta {
            contract_number: " 123 ".into(),
            client_code: Some("  ".into()),
            ..header()
        }
        .normalized();
        assert_eq!(meta.contract_number, "123");
        assert!(meta.client_code.is_none());
    }

    #[test]
    fn shipped_asset_for_exchange() {
        let mut rec = MovementRecord {
            row: 1,
            contract_number: "123".into(),
            client_code: "001".into(),
            asset: "OLD".into(),
            transaction: TransactionType::Troca,
            movement_date: NaiveDate::from_ymd_opt(2025, 8, 5).unwrap(),
            replacement_asset: Some("NEW".into()),
            service_order: None,
            details: ItemDetails::default(),
        };
        assert_eq!(rec.shipped_asset(), "NEW");
        rec.replacement_asset = None;
        assert_eq!(rec.shipped_asset(), "OLD");
        rec.transaction = TransactionType::Envio;
        assert_eq!(rec.shipped_asset(), "OLD");
    }
}
