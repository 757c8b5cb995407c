//! Storage layer: contract headers, items, staged batches, fingerprint history
//! and the audit table, all in one DuckDB database.
//!
//! Every row-level operation in [`rows`] takes a plain `&Connection`, so the
//! same functions run inside a [`duckdb::Transaction`] (which derefs to a
//! connection) during a batch commit and outside one for reads.

mod error;
pub use error::StoreError;

#[cfg(feature = "duckdb")]
mod analytics;
#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub mod rows;
#[cfg(feature = "duckdb")]
mod schema;

#[cfg(feature = "duckdb")]
pub use analytics::{ClientRank, Dashboard, DashboardFilter, MaturityBucket, MonthPoint, Totals};
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
#[cfg(feature = "duckdb")]
pub use duckdb::{Connection, Transaction};
#[cfg(feature = "duckdb")]
pub use rows::{ItemFilter, ItemOrder, ItemPage, SortDir};
