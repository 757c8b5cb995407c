//! Vertical card display for headers, batches, commit outcomes and the
//! dashboard. Tables of rows go through Arrow's pretty printer instead.

use std::fmt::Display;

use contratos_core::{ContractItem, ImportBatch, LogEntry};
use contratos_import::{CommitOutcome, HeaderDetail, HeaderImportReport, ImportSummary};
use contratos_store::{Dashboard, ItemPage};

const MAX_LIST_ITEMS: usize = 10;

fn field(name: &str, value: impl Display) {
    println!("  {:<26} {}", name, value);
}

fn opt_field(name: &str, value: Option<impl Display>) {
    if let Some(v) = value {
        field(name, v);
    }
}

fn text_field(name: &str, value: &str) {
    if !value.is_empty() {
        field(name, value);
    }
}

fn money(v: f64) -> String {
    format!("{v:.2}")
}

// ── Headers ──

pub fn print_header_card(detail: &HeaderDetail) {
    let h = &detail.header;
    println!("=== Contract {} ===", h.meta.contract_number);
    println!("{}", h.meta.client_name);
    println!();

    println!("Identity");
    opt_field("client_code", h.meta.client_code.as_deref());
    text_field("cnpj", &h.meta.cnpj);
    text_field("seller", &h.meta.seller);
    println!();

    println!("Terms");
    field("term_months", h.meta.term_months);
    text_field("adjustment_index", &h.meta.adjustment_index);
    opt_field("start_date", h.meta.start_date);
    let missing = h.meta.missing_fields();
    if !missing.is_empty() {
        field("incomplete", missing.join(", "));
    }
    println!();

    println!("Figures");
    field("months_remaining", h.aggregates.months_remaining);
    field("global_value", money(h.aggregates.global_value));
    field("present_value", money(h.aggregates.present_value));
    println!();

    print_items(&detail.items);
}

fn print_items(items: &[ContractItem]) {
    println!("Items ({})", items.len());
    for item in items.iter().take(MAX_LIST_ITEMS) {
        print!("    {:<16} {:>10}", item.asset, money(item.monthly_value));
        print!("  shipped {}", item.shipped_on);
        if let Some(d) = item.exchanged_on {
            print!("  exchanged {d}");
        }
        println!("  ({} months left)", item.derived.months_remaining);
        if let Some(desc) = item.description.as_deref() {
            println!("      {desc}");
        }
    }
    if items.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", items.len() - MAX_LIST_ITEMS);
    }
    println!();
}

pub fn print_header_report(report: &HeaderImportReport) {
    println!("=== Header import ===");
    field("rows", report.total_rows);
    field("created", report.created.len());
    field("updated", report.updated.len());
    field("skipped", report.skipped.len());
    field("invalid", report.invalid.len());
    for e in report.invalid.iter().take(MAX_LIST_ITEMS) {
        println!("    row {:<5} {}", e.row, e.messages.join("; "));
    }
}

// ── Imports ──

pub fn print_batch_card(batch: &ImportBatch) {
    println!("=== Import batch {} ===", batch.id);
    opt_field("file", batch.file_name.as_deref());
    field("status", batch.status);
    field("created_at", batch.created_at.format("%Y-%m-%d %H:%M:%S"));
    opt_field("closed_at", batch.closed_at.map(|t| t.format("%Y-%m-%d %H:%M:%S")));
    println!();

    println!("Rows");
    field("total", batch.total_rows);
    field("admitted", batch.admitted());
    field("duplicates", batch.duplicates);
    field("invalid", batch.invalid);
    if let Some(c) = batch.outcome {
        field("applied", c.applied);
        field("skipped_duplicates", c.skipped_duplicates);
        field("rejected", c.rejected);
    }
    println!();

    if !batch.records.is_empty() {
        println!("Records ({})", batch.records.len());
        for staged in batch.records.iter().take(MAX_LIST_ITEMS) {
            let r = &staged.record;
            print!(
                "    row {:<5} {:<8} {:<12} {:<16} {}",
                r.row, r.transaction, r.contract_number, r.asset, r.movement_date
            );
            if let Some(new) = r.replacement_asset.as_deref() {
                print!("  -> {new}");
            }
            println!();
            for w in &staged.warnings {
                println!("      ! {w}");
            }
        }
        if batch.records.len() > MAX_LIST_ITEMS {
            println!("    ... and {} more", batch.records.len() - MAX_LIST_ITEMS);
        }
        println!();
    }

    if !batch.exclusions.is_empty() {
        println!("Excluded ({})", batch.exclusions.len());
        for e in batch.exclusions.iter().take(MAX_LIST_ITEMS) {
            println!("    row {:<5} {:<10} {}", e.row, e.kind.as_str(), e.messages.join("; "));
        }
        if batch.exclusions.len() > MAX_LIST_ITEMS {
            println!("    ... and {} more", batch.exclusions.len() - MAX_LIST_ITEMS);
        }
        println!();
    }
}

pub fn print_summary(summary: &ImportSummary) {
    println!("=== Import {} committed ===", summary.batch_id);
    opt_field("file", summary.file_name.as_deref());
    field("committed_at", summary.committed_at.format("%Y-%m-%d %H:%M:%S"));
    field("applied", summary.applied);
    field("skipped_duplicates", summary.skipped_duplicates);
    field("rejected", summary.rejected);
    field("inserted", summary.inserted);
    field("updated", summary.updated);
    field("returned", summary.returned);
    field("exchanged", summary.exchanged);
    if !summary.contracts.is_empty() {
        field("contracts", summary.contracts.join(", "));
    }
    println!();
}

pub fn print_history(history: &[ImportSummary]) {
    for s in history {
        print!(
            "{:>6}  {}  applied {:<5} skipped {:<5} rejected {:<5}",
            s.batch_id,
            s.committed_at.format("%Y-%m-%d %H:%M:%S"),
            s.applied,
            s.skipped_duplicates,
            s.rejected
        );
        if let Some(file) = s.file_name.as_deref() {
            print!(" {file}");
        }
        println!();
    }
}

pub fn print_commit(outcome: &CommitOutcome) {
    print_summary(&outcome.summary);
    if !outcome.rejections.is_empty() {
        println!("Rejected");
        for e in &outcome.rejections {
            println!("    row {:<5} {}", e.row, e.messages.join("; "));
        }
        println!();
    }
    for h in &outcome.headers {
        println!(
            "    {:<12} {:>3} months  global {:>12}  present {:>12}",
            h.meta.contract_number,
            h.aggregates.months_remaining,
            money(h.aggregates.global_value),
            money(h.aggregates.present_value)
        );
    }
}

// ── Items ──

pub fn print_item_page(listing: &ItemPage) {
    let pages = listing.total.div_ceil(listing.per_page).max(1);
    println!("=== Items (page {} of {}) ===", listing.page, pages);
    field("matching", listing.total);
    field("monthly_value", money(listing.monthly_value_sum));
    field("backlog", money(listing.backlog_sum));
    println!();
    for item in &listing.items {
        print!(
            "    {:<12} {:<16} {:<24} {:>10}  shipped {}",
            item.contract_number,
            item.asset,
            item.client_name.as_deref().unwrap_or("-"),
            money(item.monthly_value),
            item.shipped_on
        );
        if let Some(d) = item.returned_on {
            print!("  returned {d}");
        }
        println!("  ({} months left)", item.derived.months_remaining);
    }
}

// ── Dashboard & logs ──

pub fn print_dashboard(d: &Dashboard) {
    println!("=== Dashboard ===");
    println!();
    println!("Totals");
    field("contracts", d.totals.contracts);
    field("contracts_with_items", d.totals.contracts_with_items);
    field("items", d.totals.items);
    field("monthly_value", money(d.totals.monthly_value));
    field("global_value", money(d.totals.global_value));
    field("present_value", money(d.totals.present_value));
    println!();

    println!("Monthly series");
    for p in &d.monthly_series {
        println!("    {}  {:>12}", p.month, money(p.monthly_value));
    }
    println!();

    println!("Top clients by present value");
    for c in &d.top_clients_by_present_value {
        println!("    {:<30} {:>12}", c.client, money(c.value));
    }
    println!();

    println!("Top clients by items");
    for c in &d.top_clients_by_items {
        println!("    {:<30} {:>12}", c.client, c.value);
    }
    println!();

    println!("Maturity (months remaining)");
    for b in &d.maturity {
        println!("    {:<6} {:>6} items {:>12}", b.label, b.items, money(b.monthly_value));
    }
}

pub fn print_log(entry: &LogEntry) {
    print!(
        "{:>6}  {}  {:<15} {:<12}",
        entry.id.unwrap_or_default(),
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.action,
        entry.contract_number
    );
    if let Some(asset) = entry.asset.as_deref() {
        print!(" {asset}");
    }
    if let Some(batch) = entry.batch_id {
        print!("  batch {batch}");
    }
    println!();
}
