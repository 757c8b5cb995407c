//! Composite movement fingerprint used for anti-duplication.
//!
//! A fingerprint is the SHA-256 (lowercase hex) of
//! `contract|client|type|asset|replacement|date`, each text field trimmed and
//! the date in ISO form. The replacement slot is empty except for exchanges
//! that ship a different asset.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::TransactionType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        contract_number: &str,
        client_code: &str,
        transaction: TransactionType,
        asset: &str,
        replacement_asset: &str,
        movement_date: NaiveDate,
    ) -> Self {
        let base = format!(
            "{}|{}|{}|{}|{}|{}",
            contract_number.trim(),
            client_code.trim(),
            transaction.as_str(),
            asset.trim(),
            replacement_asset.trim(),
            movement_date.format("%Y-%m-%d"),
        );
        Self(hex::encode(Sha256::digest(base.as_bytes())))
    }

    /// Wrap a fingerprint previously produced by [`compute`](Self::compute).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    #[test]
    fn stable_hex_digest() {
        let fp = Fingerprint::compute("123", "001", TransactionType::Envio, "A1", "", date());
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        let again = Fingerprint::compute("123", "001", TransactionType::Envio, "A1", "", date());
        assert_eq!(fp, again);
    }

    #[test]
    fn surrounding_whitespace_ignored() {
        let a = Fingerprint::compute("123", "001", TransactionType::Envio, "A1", "", date());
        let b = Fingerprint::compute(" 123 ", "001 ", TransactionType::Envio, " A1", "", date());
        assert_eq!(a, b);
    }

    #[test]
    fn every_component_matters() {
        let base = Fingerprint::compute("123", "001", TransactionType::Envio, "A1", "", date());
        let variants = [
            Fingerprint::compute("124", "001", TransactionType::Envio, "A1", "", date()),
            Fingerprint::compute("123", "002", TransactionType::Envio, "A1", "", date()),
            Fingerprint::compute("123", "001", TransactionType::Retorno, "A1", "", date()),
            Fingerprint::compute("123", "001", TransactionType::Envio, "A2", "", date()),
            Fingerprint::compute("123", "001", TransactionType::Envio, "A1", "B1", date()),
            Fingerprint::compute(
                "123",
                "001",
                TransactionType::Envio,
                "A1",
                "",
                NaiveDate::from_ymd_opt(2025, 8, 2).unwrap(),
            ),
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let fp = Fingerprint::from_hex("abc");
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"abc\"");
    }
}
