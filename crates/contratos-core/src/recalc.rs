//! Derived contract figures.
//!
//! Everything here is a pure function of header metadata, the active items
//! and `today`; stored aggregates are never read back as input, so running
//! [`recompute`] twice without an intervening mutation yields the same values.

use chrono::{Datelike, NaiveDate};

use crate::model::{ContractItem, Derived, HeaderMeta};
use crate::parse::parse_annual_rate;

/// Whole months from `start` to `end`. A month only completes once the
/// day-of-month of `start` is reached. Never negative.
pub fn months_elapsed(start: NaiveDate, end: NaiveDate) -> i32 {
    let years = end.year() - start.year();
    let months = end.month() as i32 - start.month() as i32;
    let mut total = years * 12 + months;
    if end.day() < start.day() {
        total -= 1;
    }
    total.max(0)
}

/// Months of `term` still to run for something that started on `start`.
pub fn months_remaining(start: NaiveDate, term_months: i32, today: NaiveDate) -> i32 {
    if term_months <= 0 {
        return 0;
    }
    (term_months - months_elapsed(start, today)).max(0)
}

/// Equivalent monthly rate of an annual rate: `(1 + annual)^(1/12) - 1`.
pub fn monthly_rate(annual: f64) -> f64 {
    if annual <= 0.0 {
        return 0.0;
    }
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Present value of `monthly` paid over `months` at `rate` per month.
pub fn present_value(monthly: f64, months: i32, rate: f64) -> f64 {
    if months <= 0 || monthly <= 0.0 {
        return 0.0;
    }
    if rate <= 0.0 {
        return round2(monthly * months as f64);
    }
    round2(monthly * (1.0 - (1.0 + rate).powi(-months)) / rate)
}

/// Derived figures of a single item.
pub fn item_values(
    monthly_value: f64,
    term_months: i32,
    shipped_on: NaiveDate,
    rate: f64,
    today: NaiveDate,
) -> Derived {
    let remaining = months_remaining(shipped_on, term_months, today);
    Derived {
        months_remaining: remaining,
        global_value: round2(monthly_value * term_months.max(0) as f64),
        present_value: present_value(monthly_value, remaining, rate),
    }
}

/// Output of [`recompute`]: header aggregates plus per-item figures keyed by item id.
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    pub header: Derived,
    pub items: Vec<(i64, Derived)>,
}

/// Recompute a header and its items. Returned items are ignored.
pub fn recompute(meta: &HeaderMeta, items: &[ContractItem], today: NaiveDate) -> Recomputed {
    let rate = monthly_rate(parse_annual_rate(&meta.adjustment_index));

    let per_item: Vec<(i64, Derived)> = items
        .iter()
        .filter(|i| i.is_active())
        .map(|i| {
            (
                i.id,
                item_values(i.monthly_value, meta.term_months, i.shipped_on, rate, today),
            )
        })
        .collect();

    let months = match meta.start_date {
        Some(start) => months_remaining(start, meta.term_months, today),
        None => per_item
            .iter()
            .map(|(_, d)| d.months_remaining)
            .max()
            .unwrap_or(0),
    };
    let global: f64 = per_item.iter().map(|(_, d)| d.global_value).sum();
    let present: f64 = per_item.iter().map(|(_, d)| d.present_value).sum();

    Recomputed {
        header: Derived {
            months_remaining: months,
            global_value: round2(global),
            present_value: round2(present),
        },
        items: per_item,
    }
}
