//! Fingerprint-based deduplication of parsed movement records.

use std::collections::{HashMap, HashSet};

use contratos_core::{Exclusion, ExclusionKind, Fingerprint, MovementRecord};

/// Records split into admitted and duplicate.
#[derive(Debug, Default)]
pub struct Filtered {
    /// Admitted records with their fingerprints, input order kept.
    pub admitted: Vec<(Fingerprint, MovementRecord)>,
    pub duplicates: Vec<Exclusion>,
}

/// Admit each record whose fingerprint is neither in `seen` (committed
/// history) nor carried by a record admitted earlier in the same input.
///
/// After filtering, admitted fingerprints are unique and disjoint from `seen`.
pub fn filter(records: Vec<MovementRecord>, seen: &HashSet<Fingerprint>) -> Filtered {
    let mut out = Filtered::default();
    let mut first_row: HashMap<Fingerprint, usize> = HashMap::new();

    for record in records {
        let fp = record.fingerprint();
        let message = if seen.contains(&fp) {
            Some("duplicate of an already committed movement".to_string())
        } else {
            first_row
                .get(&fp)
                .map(|row| format!("duplicate of row {row} in this file"))
        };
        match message {
            Some(message) => out.duplicates.push(Exclusion {
                row: record.row,
                kind: ExclusionKind::Duplicate,
                fingerprint: Some(fp),
                messages: vec![message],
            }),
            None => {
                first_row.insert(fp.clone(), record.row);
                out.admitted.push((fp, record));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use contratos_core::{ItemDetails, TransactionType};

    fn rec(row: usize, asset: &str, day: u32) -> MovementRecord {
        MovementRecord {
            row,
            contract_number: "123".into(),
            client_code: "001".into(),
            asset: asset.into(),
            transaction: TransactionType::Envio,
            movement_date: NaiveDate::from_ymd_opt(2025, 8, day).unwrap(),
            replacement_asset: None,
            service_order: None,
            details: ItemDetails::default(),
        }
    }

    #[test]
    fn admits_fresh_records_in_order() {
        let out = filter(vec![rec(1, "A1", 1), rec(2, "A2", 1)], &HashSet::new());
        assert_eq!(out.admitted.len(), 2);
        assert_eq!(out.admitted[0].1.row, 1);
        assert!(out.duplicates.is_empty());
    }

    #[test]
    fn excludes_history_and_in_file_repeats() {
        let seen: HashSet<_> = [rec(9, "A1", 1).fingerprint()].into();
        let out = filter(
            vec![rec(1, "A1", 1), rec(2, "A2", 1), rec(3, "A2", 1), rec(4, "A2", 2)],
            &seen,
        );
        let admitted: Vec<_> = out.admitted.iter().map(|(_, r)| r.row).collect();
        assert_eq!(admitted, vec![2, 4]);
        assert_eq!(out.duplicates.len(), 2);
        assert_eq!(out.duplicates[0].row, 1);
        assert!(out.duplicates[0].messages[0].contains("committed"));
        assert_eq!(out.duplicates[1].row, 3);
        assert!(out.duplicates[1].messages[0].contains("row 2"));
    }

    #[test]
    fn admitted_fingerprints_are_unique_and_disjoint_from_history() {
        let seen: HashSet<_> = [rec(0, "A3", 3).fingerprint()].into();
        let input: Vec<_> = (1..=20).map(|i| rec(i, &format!("A{}", i % 4), (i % 3) as u32 + 1)).collect();
        let out = filter(input, &seen);
        let fps: HashSet<_> = out.admitted.iter().map(|(fp, _)| fp.clone()).collect();
        assert_eq!(fps.len(), out.admitted.len());
        assert!(fps.is_disjoint(&seen));
        assert_eq!(out.admitted.len() + out.duplicates.len(), 20);
    }
}
