//! DuckDB connection owner for the contract store.

use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use duckdb::{Connection, Transaction, params_from_iter};
use tracing::{debug, info};

use crate::StoreError;
use crate::schema::{SCHEMA, TABLES};

/// DuckDB store holding contract headers, items, staged import batches, the
/// fingerprint history and the audit log.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for file-backed storage that survives across process restarts. Both apply
/// the schema, which is idempotent.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "opened contract store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        debug!(tables = TABLES.len(), "schema applied");
        Ok(Self { conn })
    }

    /// Check whether every store table exists.
    pub fn has_tables(&self) -> bool {
        TABLES.iter().all(|t| self.count_table(t).is_ok())
    }

    // ── Counts ──

    pub fn header_count(&self) -> Result<usize, StoreError> {
        self.count_table("contract_headers")
    }

    pub fn history_count(&self) -> Result<usize, StoreError> {
        self.count_table("movement_history")
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    // ── Transactions ──

    /// Begin a transaction. Dropping it without [`Transaction::commit`] rolls
    /// everything back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    // ── Escape hatch ──

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Execute SQL with text bind values. The schema comes back alongside the
    /// batches so an empty result still describes its columns.
    pub fn query_arrow_params(
        &self,
        sql: &str,
        args: &[String],
    ) -> Result<(SchemaRef, Vec<RecordBatch>), StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let arrow = stmt.query_arrow(params_from_iter(args.iter()))?;
        let schema = arrow.get_schema();
        Ok((schema, arrow.collect()))
    }

    /// Access the underlying DuckDB connection for the functions in [`rows`](crate::rows).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_core::HeaderMeta;

    use crate::rows;

    fn meta(number: &str) -> HeaderMeta {
        HeaderMeta {
            contract_number: number.into(),
            client_name: "ACME".into(),
            ..HeaderMeta::default()
        }
    }

    #[test]
    fn open_in_memory() {
        let store = DuckStore::open().unwrap();
        let batches = store.query_arrow("SELECT 1 AS x").unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 1);
        assert!(store.has_tables());
        assert_eq!(store.header_count().unwrap(), 0);
    }

    #[test]
    fn parameterised_query_keeps_schema_when_empty() {
        let store = DuckStore::open().unwrap();
        let (schema, batches) = store
            .query_arrow_params(
                "SELECT contract_number FROM contract_headers WHERE contract_number = ?",
                &["123".to_string()],
            )
            .unwrap();
        assert_eq!(schema.field(0).name(), "contract_number");
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
    }

    #[test]
    fn open_persistent_creates_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");
        assert!(!db_path.exists());

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(store.has_tables());
    }

    #[test]
    fn persistent_reopen_keeps_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");

        let store = DuckStore::open_persistent(&db_path).unwrap();
        rows::insert_header(store.connection(), &meta("123")).unwrap();
        drop(store);

        // Schema runs again on reopen without clobbering data.
        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.header_count().unwrap(), 1);
        assert!(rows::find_header(store.connection(), "123").unwrap().is_some());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut store = DuckStore::open().unwrap();
        {
            let tx = store.transaction().unwrap();
            rows::insert_header(&tx, &meta("123")).unwrap();
        }
        assert_eq!(store.header_count().unwrap(), 0);

        let tx = store.transaction().unwrap();
        rows::insert_header(&tx, &meta("123")).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.header_count().unwrap(), 1);
    }
}
