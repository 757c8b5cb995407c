//! Import batches: the staged, not-yet-applied result of a preview.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::model::MovementRecord;
use crate::parse::FieldError;

/// `STAGED` → `COMMITTED` | `DISCARDED`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Staged,
    Committed,
    Discarded,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staged => "STAGED",
            Self::Committed => "COMMITTED",
            Self::Discarded => "DISCARDED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STAGED" => Ok(Self::Staged),
            "COMMITTED" => Ok(Self::Committed),
            "DISCARDED" => Ok(Self::Discarded),
            other => Err(FieldError::Invalid {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionKind {
    /// Fingerprint already in history or earlier in the same file.
    Duplicate,
    /// Row could not be turned into a movement record.
    Invalid,
}

impl ExclusionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Invalid => "invalid",
        }
    }
}

impl FromStr for ExclusionKind {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(Self::Duplicate),
            "invalid" => Ok(Self::Invalid),
            other => Err(FieldError::Invalid {
                field: "exclusion kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A row left out of a batch, with the reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub row: usize,
    pub kind: ExclusionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub messages: Vec<String>,
}

/// An admitted record awaiting commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Order of application within the batch (0-based).
    pub position: usize,
    pub fingerprint: Fingerprint,
    pub record: MovementRecord,
    /// Non-blocking findings shown at preview (e.g. header not registered yet).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Counts reported once a batch is committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCounts {
    pub applied: usize,
    /// Records that became duplicates between preview and commit.
    pub skipped_duplicates: usize,
    /// Records rejected because their header failed validation.
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Data rows read from the file.
    pub total_rows: usize,
    pub duplicates: usize,
    pub invalid: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CommitCounts>,
    pub records: Vec<StagedRecord>,
    pub exclusions: Vec<Exclusion>,
}

impl ImportBatch {
    pub fn admitted(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text() {
        for s in [BatchStatus::Staged, BatchStatus::Committed, BatchStatus::Discarded] {
            assert_eq!(s.as_str().parse::<BatchStatus>().unwrap(), s);
        }
        assert!("staged".parse::<BatchStatus>().is_err());
        assert_eq!(serde_json::to_string(&BatchStatus::Committed).unwrap(), "\"COMMITTED\"");
    }

    #[test]
    fn exclusion_kind_text() {
        assert_eq!("duplicate".parse::<ExclusionKind>().unwrap(), ExclusionKind::Duplicate);
        assert_eq!(ExclusionKind::Invalid.as_str(), "invalid");
    }
}
