//! Movement-import reconciliation engine.
//!
//! A movement file flows through [`ingest`] (rows → validated records),
//! [`dedup`] (fingerprint filter), [`stage`] (persisted `STAGED` batch),
//! then on commit through [`apply`] and [`recompute`] in one store
//! transaction, with every mutation written to the audit table and mirrored
//! by [`audit`] to the runtime directory. [`Engine`] ties the steps together.

pub mod apply;
pub mod audit;
pub mod dedup;
mod engine;
mod error;
pub mod headers;
pub mod ingest;
pub mod recompute;
pub mod stage;

pub use audit::{AuditLog, ImportSummary};
pub use engine::{CommitOutcome, Engine, HeaderDetail, HeaderRecalc, RecalcReport};
pub use error::ImportError;
pub use headers::{DuplicatePolicy, HeaderImportReport};
