//! Persisting recomputed figures for a header and its active items.

use chrono::NaiveDate;
use contratos_core::{ContractHeader, recompute};
use contratos_store::{Connection, rows};
use tracing::debug;

use crate::ImportError;

/// Recompute one header from its metadata and current active items, write
/// the figures back, and return the updated header with its item count.
pub fn recompute_header(
    conn: &Connection,
    header_id: i64,
    today: NaiveDate,
) -> Result<(ContractHeader, usize), ImportError> {
    let mut header = rows::header_by_id(conn, header_id)?
        .ok_or_else(|| ImportError::ContractNotFound(format!("#{header_id}")))?;
    let items = rows::active_items(conn, header_id)?;
    let out = recompute(&header.meta, &items, today);

    for (item_id, values) in &out.items {
        rows::set_item_derived(conn, *item_id, values)?;
    }
    rows::set_header_aggregates(conn, header_id, &out.header)?;
    header.aggregates = out.header;
    debug!(
        contract = %header.meta.contract_number,
        items = items.len(),
        global_value = header.aggregates.global_value,
        present_value = header.aggregates.present_value,
        "recomputed header"
    );
    Ok((header, items.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_core::{
        ContractItem, Derived, HeaderMeta, ItemStatus, TransactionType, recalc::item_values,
    };
    use contratos_store::DuckStore;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn writes_item_and_header_figures() {
        let store = DuckStore::open().unwrap();
        let conn = store.connection();
        let meta = HeaderMeta {
            contract_number: "123".into(),
            client_name: "ACME".into(),
            term_months: 12,
            ..HeaderMeta::default()
        };
        let hid = rows::insert_header(conn, &meta).unwrap();
        let item = ContractItem {
            id: 0,
            header_id: hid,
            contract_number: "123".into(),
            asset: "A1".into(),
            client_code: "001".into(),
            client_name: None,
            serial: None,
            product_code: None,
            description: None,
            monthly_value: 100.0,
            shipped_on: ymd(2025, 2, 1),
            exchanged_on: None,
            returned_on: None,
            last_transaction: TransactionType::Envio,
            status: ItemStatus::Active,
            fingerprint: None,
            derived: Derived::default(),
        };
        let id = rows::insert_item(conn, &item).unwrap();

        let today = ymd(2025, 8, 1);
        let (header, count) = recompute_header(conn, hid, today).unwrap();
        assert_eq!(count, 1);
        assert_eq!(header.aggregates.global_value, 1200.0);
        assert_eq!(header.aggregates.months_remaining, 6);
        assert_eq!(header.aggregates.present_value, 600.0);

        let stored = rows::item_by_id(conn, id).unwrap().unwrap();
        assert_eq!(stored.derived, item_values(100.0, 12, ymd(2025, 2, 1), 0.0, today));
        assert_eq!(rows::header_by_id(conn, hid).unwrap().unwrap(), header);

        // Idempotent.
        let (again, _) = recompute_header(conn, hid, today).unwrap();
        assert_eq!(again, header);
    }
}
