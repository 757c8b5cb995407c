//! Audit trail entries. Entries are append-only: once written they are never
//! updated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::model::TransactionType;
use crate::parse::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// One mutation of one contract item.
    Item,
    /// One change to a header's metadata or aggregates.
    Header,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Header => "header",
        }
    }
}

impl FromStr for LogKind {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "item" => Ok(Self::Item),
            "header" => Ok(Self::Header),
            other => Err(FieldError::Invalid {
                field: "kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    EnvioInserted,
    EnvioUpdated,
    Retorno,
    TrocaRetorno,
    TrocaEnvio,
    BatchApplied,
    HeaderCreated,
    HeaderUpdated,
    Recalculated,
}

impl AuditAction {
    pub const ALL: [AuditAction; 9] = [
        Self::EnvioInserted,
        Self::EnvioUpdated,
        Self::Retorno,
        Self::TrocaRetorno,
        Self::TrocaEnvio,
        Self::BatchApplied,
        Self::HeaderCreated,
        Self::HeaderUpdated,
        Self::Recalculated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvioInserted => "ENVIO_INSERTED",
            Self::EnvioUpdated => "ENVIO_UPDATED",
            Self::Retorno => "RETORNO",
            Self::TrocaRetorno => "TROCA_RETORNO",
            Self::TrocaEnvio => "TROCA_ENVIO",
            Self::BatchApplied => "BATCH_APPLIED",
            Self::HeaderCreated => "HEADER_CREATED",
            Self::HeaderUpdated => "HEADER_UPDATED",
            Self::Recalculated => "RECALCULATED",
        }
    }

    pub fn kind(&self) -> LogKind {
        match self {
            Self::EnvioInserted
            | Self::EnvioUpdated
            | Self::Retorno
            | Self::TrocaRetorno
            | Self::TrocaEnvio => LogKind::Item,
            Self::BatchApplied | Self::HeaderCreated | Self::HeaderUpdated | Self::Recalculated => {
                LogKind::Header
            }
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| FieldError::Invalid {
                field: "action",
                value: s.to_string(),
            })
    }
}

/// One audit record. Item entries carry the fingerprint of the movement that
/// produced them; header entries carry the recomputed aggregates in `detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub kind: LogKind,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    pub contract_number: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl LogEntry {
    /// A new entry of the kind implied by `action`, stamped now.
    pub fn new(action: AuditAction, contract_number: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: action.kind(),
            recorded_at: Utc::now(),
            batch_id: None,
            header_id: None,
            item_id: None,
            contract_number: contract_number.into(),
            action,
            asset: None,
            client_code: None,
            transaction: None,
            movement_date: None,
            fingerprint: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_batch(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_header(mut self, header_id: i64) -> Self {
        self.header_id = Some(header_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
