use contratos_core::{BatchStatus, TransactionType};
use contratos_store::StoreError;
use thiserror::Error;

/// Failures of the import engine.
///
/// Row-level validation problems and duplicates never surface here: they are
/// reported inside the staged batch. Everything below aborts the operation,
/// and during a commit rolls back every mutation already applied.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("contract {contract} has no registered header (row {row})")]
    HeaderNotFound { contract: String, row: usize },

    #[error(
        "row {row}: no active item for {transaction} of asset {asset} \
         (contract {contract}, client {client})"
    )]
    Reconciliation {
        row: usize,
        contract: String,
        asset: String,
        client: String,
        transaction: TransactionType,
    },

    #[error("import batch {0} not found")]
    BatchNotFound(i64),

    #[error("import batch {id} is {status}, only STAGED batches can change")]
    BatchNotStaged { id: i64, status: BatchStatus },

    #[error("file has no data rows")]
    EmptyFile,

    #[error("required column missing: {0}")]
    MissingColumn(&'static str),

    #[error("contract {0} not found")]
    ContractNotFound(String),

    #[error("contract {0} already registered")]
    DuplicateHeader(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

