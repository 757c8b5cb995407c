pub mod audit;
pub mod batch;
pub mod fingerprint;
pub mod model;
pub mod parse;
pub mod recalc;

pub use audit::{AuditAction, LogEntry, LogKind};
pub use batch::{BatchStatus, CommitCounts, Exclusion, ExclusionKind, ImportBatch, StagedRecord};
pub use fingerprint::Fingerprint;
pub use model::{
    ContractHeader, ContractItem, Derived, HeaderMeta, ItemDetails, ItemStatus, MovementRecord,
    TransactionType,
};
pub use parse::FieldError;
pub use recalc::{Recomputed, recompute};
