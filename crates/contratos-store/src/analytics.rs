//! Analytical path: dashboard aggregates over active items and the filtered
//! CSV export.

use std::io::Write;

use arrow::csv::WriterBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use duckdb::params_from_iter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rows::{ItemFilter, push_contains};
use crate::{DuckStore, StoreError};

/// Optional dashboard filters. All apply to active items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardFilter {
    /// Case-insensitive substring of the item's client name.
    #[serde(default)]
    pub client: Option<String>,
    /// Earliest shipped-on date, inclusive.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Latest shipped-on date, inclusive.
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DashboardFilter {
    pub fn is_empty(&self) -> bool {
        self.client.as_deref().is_none_or(|c| c.trim().is_empty())
            && self.from.is_none()
            && self.to.is_none()
    }

    /// SQL predicate over `contract_items` plus its bind values.
    fn predicate(&self) -> (String, Vec<String>) {
        let mut sql = String::from("status = 'ACTIVE'");
        let mut args = Vec::new();
        push_contains(&mut sql, &mut args, "client_name", self.client.as_deref());
        if let Some(from) = self.from {
            sql.push_str(" AND shipped_on >= CAST(? AS DATE)");
            args.push(from.to_string());
        }
        if let Some(to) = self.to {
            sql.push_str(" AND shipped_on <= CAST(? AS DATE)");
            args.push(to.to_string());
        }
        (sql, args)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub contracts: usize,
    pub contracts_with_items: usize,
    pub items: usize,
    pub monthly_value: f64,
    pub global_value: f64,
    pub present_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthPoint {
    /// `YYYY-MM`
    pub month: String,
    pub monthly_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRank {
    pub client: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityBucket {
    pub label: String,
    pub items: usize,
    pub monthly_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub totals: Totals,
    /// Monthly value shipped per month, oldest first, always 12 points.
    pub monthly_series: Vec<MonthPoint>,
    pub top_clients_by_present_value: Vec<ClientRank>,
    pub top_clients_by_items: Vec<ClientRank>,
    pub maturity: Vec<MaturityBucket>,
}

const MATURITY_LABELS: [&str; 5] = ["0-3", "4-6", "7-9", "10-12", ">12"];

/// The 12 `YYYY-MM` keys ending at `today`'s month.
fn last_12_months(today: NaiveDate) -> Vec<String> {
    let anchor = today.year() * 12 + today.month0() as i32;
    (0..12)
        .rev()
        .map(|back| {
            let m = anchor - back;
            format!("{:04}-{:02}", m.div_euclid(12), m.rem_euclid(12) + 1)
        })
        .collect()
}

impl DuckStore {
    /// Dashboard aggregates over active items matching `filter`.
    pub fn dashboard(&self, filter: &DashboardFilter, today: NaiveDate) -> Result<Dashboard, StoreError> {
        let conn = self.connection();
        let (pred, args) = filter.predicate();

        let sql = format!(
            "SELECT count(*)::BIGINT,
                    count(DISTINCT header_id)::BIGINT,
                    coalesce(sum(monthly_value), 0)::DOUBLE,
                    coalesce(sum(global_value), 0)::DOUBLE,
                    coalesce(sum(present_value), 0)::DOUBLE
             FROM contract_items WHERE {pred}"
        );
        let mut totals = conn.query_row(&sql, params_from_iter(args.iter()), |row| {
            let items: i64 = row.get(0)?;
            let with_items: i64 = row.get(1)?;
            Ok(Totals {
                contracts: 0,
                contracts_with_items: with_items as usize,
                items: items as usize,
                monthly_value: row.get(2)?,
                global_value: row.get(3)?,
                present_value: row.get(4)?,
            })
        })?;
        totals.contracts = if filter.is_empty() {
            self.header_count()?
        } else {
            totals.contracts_with_items
        };

        let sql = format!(
            "SELECT strftime(shipped_on, '%Y-%m') AS month,
                    coalesce(sum(monthly_value), 0)::DOUBLE
             FROM contract_items WHERE {pred}
             GROUP BY month"
        );
        let mut stmt = conn.prepare(&sql)?;
        let by_month = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<std::collections::HashMap<_, _>, _>>()?;
        let monthly_series = last_12_months(today)
            .into_iter()
            .map(|month| MonthPoint {
                monthly_value: by_month.get(&month).copied().unwrap_or(0.0),
                month,
            })
            .collect();

        let rank = |measure: &str| -> Result<Vec<ClientRank>, StoreError> {
            let sql = format!(
                "SELECT coalesce(client_name, 'N/D') AS client, {measure} AS value
                 FROM contract_items WHERE {pred}
                 GROUP BY client
                 ORDER BY value DESC, client
                 LIMIT 10"
            );
            let mut stmt = conn.prepare(&sql)?;
            let ranks = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok(ClientRank {
                        client: row.get(0)?,
                        value: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ranks)
        };
        let top_clients_by_present_value = rank("coalesce(sum(present_value), 0)::DOUBLE")?;
        let top_clients_by_items = rank("count(*)::DOUBLE")?;

        let sql = format!(
            "SELECT CASE
                        WHEN months_remaining <= 3 THEN 0
                        WHEN months_remaining <= 6 THEN 1
                        WHEN months_remaining <= 9 THEN 2
                        WHEN months_remaining <= 12 THEN 3
                        ELSE 4
                    END AS bucket,
                    count(*)::BIGINT,
                    coalesce(sum(monthly_value), 0)::DOUBLE
             FROM contract_items WHERE {pred}
             GROUP BY bucket"
        );
        let mut maturity: Vec<MaturityBucket> = MATURITY_LABELS
            .iter()
            .map(|label| MaturityBucket {
                label: (*label).to_string(),
                items: 0,
                monthly_value: 0.0,
            })
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (bucket, count, value) in rows {
            if let Some(slot) = maturity.get_mut(bucket as usize) {
                slot.items = count as usize;
                slot.monthly_value = value;
            }
        }

        Ok(Dashboard {
            totals,
            monthly_series,
            top_clients_by_present_value,
            top_clients_by_items,
            maturity,
        })
    }

    // ── Export ──

    /// Items matching `filter` joined with their header, as Arrow batches
    /// plus the result schema.
    pub fn items_overview(
        &self,
        filter: &ItemFilter,
    ) -> Result<(SchemaRef, Vec<RecordBatch>), StoreError> {
        let (pred, args) = filter.predicate("i.");
        let sql = format!(
            "SELECT i.contract_number, i.client_code, i.client_name, h.cnpj, h.seller,
                    i.asset, i.serial, i.product_code, i.description, i.monthly_value,
                    i.shipped_on, i.exchanged_on, i.returned_on, i.last_transaction, i.status,
                    i.months_remaining, i.global_value, i.present_value,
                    round(i.monthly_value * i.months_remaining, 2) AS backlog
             FROM contract_items i
             JOIN contract_headers h ON h.id = i.header_id
             WHERE {pred}
             ORDER BY {}",
            filter.order("i.")
        );
        self.query_arrow_params(&sql, &args)
    }

    /// Headers with their aggregates and active item counts, as Arrow batches.
    pub fn headers_overview(&self) -> Result<Vec<RecordBatch>, StoreError> {
        self.query_arrow(
            "SELECT h.contract_number, h.client_name, h.term_months, h.adjustment_index,
                    h.months_remaining, h.global_value, h.present_value,
                    count(i.id)::BIGINT AS items
             FROM contract_headers h
             LEFT JOIN contract_items i ON i.header_id = h.id AND i.status = 'ACTIVE'
             GROUP BY ALL
             ORDER BY h.contract_number",
        )
    }

    /// Write the items matching `filter` as CSV. The header row is written
    /// even when nothing matches. Returns the rows written.
    pub fn export_items_csv<W: Write>(&self, out: W, filter: &ItemFilter) -> Result<usize, StoreError> {
        let (schema, batches) = self.items_overview(filter)?;
        let mut writer = WriterBuilder::new().with_header(true).build(out);
        let mut rows = 0;
        if batches.is_empty() {
            writer.write(&RecordBatch::new_empty(schema))?;
        }
        for batch in &batches {
            writer.write(batch)?;
            rows += batch.num_rows();
        }
        info!(rows, "exported items");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_core::{ContractItem, Derived, HeaderMeta, ItemStatus, TransactionType};

    use crate::rows::{self, ItemOrder, SortDir};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed() -> DuckStore {
        let store = DuckStore::open().unwrap();
        let conn = store.connection();
        for number in ["1", "2", "3"] {
            let meta = HeaderMeta {
                contract_number: number.into(),
                client_name: format!("Client {number}"),
                ..HeaderMeta::default()
            };
            rows::insert_header(conn, &meta).unwrap();
        }
        let h1 = rows::find_header(conn, "1").unwrap().unwrap().id;
        let h2 = rows::find_header(conn, "2").unwrap().unwrap().id;
        let items = [
            (h1, "1", "ACME", 100.0, ymd(2025, 8, 1), 2, ItemStatus::Active),
            (h1, "1", "ACME", 50.0, ymd(2025, 7, 10), 11, ItemStatus::Active),
            (h2, "2", "Beta", 30.0, ymd(2025, 8, 15), 20, ItemStatus::Active),
            (h2, "2", "Beta", 999.0, ymd(2025, 8, 15), 20, ItemStatus::Returned),
        ];
        for (i, (hid, number, client, monthly, shipped, months, status)) in items.into_iter().enumerate() {
            let item = ContractItem {
                id: 0,
                header_id: hid,
                contract_number: number.into(),
                asset: format!("A{i}"),
                client_code: "001".into(),
                client_name: Some(client.into()),
                serial: None,
                product_code: None,
                description: None,
                monthly_value: monthly,
                shipped_on: shipped,
                exchanged_on: None,
                returned_on: None,
                last_transaction: TransactionType::Envio,
                status,
                fingerprint: None,
                derived: Derived {
                    months_remaining: months,
                    global_value: monthly * 12.0,
                    present_value: monthly * months as f64,
                },
            };
            rows::insert_item(conn, &item).unwrap();
        }
        store
    }

    #[test]
    fn month_keys_cross_year() {
        let keys = last_12_months(ymd(2025, 3, 20));
        assert_eq!(keys.len(), 12);
        assert_eq!(keys.first().unwrap(), "2024-04");
        assert_eq!(keys.last().unwrap(), "2025-03");
    }

    #[test]
    fn unfiltered_dashboard() {
        let store = seed();
        let d = store.dashboard(&DashboardFilter::default(), ymd(2025, 8, 31)).unwrap();
        assert_eq!(d.totals.contracts, 3);
        assert_eq!(d.totals.contracts_with_items, 2);
        assert_eq!(d.totals.items, 3);
        assert_eq!(d.totals.monthly_value, 180.0);
        assert_eq!(d.totals.global_value, 2160.0);

        assert_eq!(d.monthly_series.len(), 12);
        let aug = d.monthly_series.last().unwrap();
        assert_eq!(aug.month, "2025-08");
        assert_eq!(aug.monthly_value, 130.0);
        assert_eq!(d.monthly_series[10].monthly_value, 50.0);

        assert_eq!(d.top_clients_by_items[0].client, "ACME");
        assert_eq!(d.top_clients_by_items[0].value, 2.0);
        // ACME: 100 * 2 + 50 * 11
        assert_eq!(d.top_clients_by_present_value[0].client, "ACME");
        assert_eq!(d.top_clients_by_present_value[0].value, 750.0);
        assert_eq!(d.top_clients_by_present_value[1].value, 600.0);

        let labels: Vec<_> = d.maturity.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, MATURITY_LABELS);
        assert_eq!(d.maturity[0].items, 1);
        assert_eq!(d.maturity[3].items, 1);
        assert_eq!(d.maturity[4].monthly_value, 30.0);
    }

    #[test]
    fn filtered_dashboard() {
        let store = seed();
        let filter = DashboardFilter {
            client: Some("acm".into()),
            from: Some(ymd(2025, 8, 1)),
            to: None,
        };
        let d = store.dashboard(&filter, ymd(2025, 8, 31)).unwrap();
        assert_eq!(d.totals.items, 1);
        assert_eq!(d.totals.contracts, 1);
        assert_eq!(d.totals.monthly_value, 100.0);
    }

    fn export(store: &DuckStore, filter: &ItemFilter) -> (usize, String) {
        let mut buf = Vec::new();
        let rows = store.export_items_csv(&mut buf, filter).unwrap();
        (rows, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn csv_export_has_header_and_active_rows() {
        let store = seed();
        let (rows, text) = export(&store, &ItemFilter::default());
        assert_eq!(rows, 3);
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("contract_number,client_code"));
        assert_eq!(lines.count(), 3);
        assert!(!text.contains("999"));
    }

    #[test]
    fn csv_export_applies_filters_and_order() {
        let store = seed();
        let filter = ItemFilter {
            client: Some("beta".into()),
            include_returned: true,
            order_by: ItemOrder::MonthlyValue,
            order_dir: SortDir::Desc,
            ..ItemFilter::default()
        };
        let (rows, text) = export(&store, &filter);
        assert_eq!(rows, 2);
        let body: Vec<_> = text.lines().skip(1).collect();
        assert!(body[0].contains("999"));
        assert!(body[0].contains("RETURNED"));
        assert!(body[1].contains("ACTIVE"));
    }

    #[test]
    fn csv_export_without_matches_still_has_header_row() {
        let store = DuckStore::open().unwrap();
        let (rows, text) = export(&store, &ItemFilter::default());
        assert_eq!(rows, 0);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("contract_number,client_code"));
        assert!(lines[0].ends_with(",backlog"));
    }

    #[test]
    fn client_filter_treats_wildcards_literally() {
        let store = seed();
        let filter = DashboardFilter {
            client: Some("a%e".into()),
            ..DashboardFilter::default()
        };
        let d = store.dashboard(&filter, ymd(2025, 8, 31)).unwrap();
        assert_eq!(d.totals.items, 0);
        let filter = DashboardFilter {
            client: Some("_".into()),
            ..DashboardFilter::default()
        };
        assert_eq!(store.dashboard(&filter, ymd(2025, 8, 31)).unwrap().totals.items, 0);
    }

    #[test]
    fn headers_overview_counts_items() {
        let store = seed();
        let batches = store.headers_overview().unwrap();
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 3);
    }
}
