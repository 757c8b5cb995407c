//! Mutation rules, one per transaction type.
//!
//! | type    | effect                                                         |
//! |---------|----------------------------------------------------------------|
//! | ENVIO   | insert an item, or update the matching active item in place    |
//! | RETORNO | close the oldest matching active item                          |
//! | TROCA   | close the old item, then ship the replacement as an ENVIO      |
//!
//! Matching is on (contract, asset, client code) among active items. Closing
//! an item marks it `RETURNED`; the row stays for the audit trail.

use chrono::NaiveDate;
use contratos_core::{
    AuditAction, ContractHeader, ContractItem, Derived, Fingerprint, ItemDetails, ItemStatus,
    MovementRecord, TransactionType,
};
use contratos_store::{Connection, rows};
use tracing::debug;

use crate::ImportError;

/// One item written by a mutation, in its post-mutation state.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    pub action: AuditAction,
    pub item: ContractItem,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub header: ContractHeader,
    pub changes: Vec<ItemChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Done(Effects),
    /// The header failed validation; nothing was written for this record.
    Rejected(String),
}

/// Apply one record. `Err` means the whole batch must abort.
pub fn apply(
    conn: &Connection,
    record: &MovementRecord,
    fingerprint: &Fingerprint,
) -> Result<Applied, ImportError> {
    let header = rows::find_header(conn, &record.contract_number)?.ok_or_else(|| {
        ImportError::HeaderNotFound {
            contract: record.contract_number.clone(),
            row: record.row,
        }
    })?;
    let missing = header.meta.missing_fields();
    if !missing.is_empty() {
        return Ok(Applied::Rejected(format!(
            "header {} incomplete: missing {}",
            header.meta.contract_number,
            missing.join(", ")
        )));
    }

    let changes = match record.transaction {
        TransactionType::Envio => vec![ship(
            conn,
            &header,
            record,
            &record.asset,
            fingerprint,
            Shipment::Plain,
        )?],
        TransactionType::Retorno => {
            let closed = close(conn, record, fingerprint)?;
            vec![ItemChange {
                action: AuditAction::Retorno,
                item: closed,
            }]
        }
        TransactionType::Troca => {
            let old = close(conn, record, fingerprint)?;
            let shipped = ship(
                conn,
                &header,
                record,
                record.shipped_asset(),
                fingerprint,
                Shipment::Replacing(&old),
            )?;
            vec![
                ItemChange {
                    action: AuditAction::TrocaRetorno,
                    item: old,
                },
                ItemChange {
                    action: AuditAction::TrocaEnvio,
                    ..shipped
                },
            ]
        }
    };
    debug!(
        row = record.row,
        contract = %record.contract_number,
        transaction = %record.transaction,
        changes = changes.len(),
        "applied movement"
    );
    Ok(Applied::Done(Effects { header, changes }))
}

enum Shipment<'a> {
    Plain,
    /// Second half of an exchange; the replacement inherits from the returned item.
    Replacing(&'a ContractItem),
}

/// Overlay the non-empty fields of `details` onto `item`.
fn overlay(item: &mut ContractItem, details: &ItemDetails) {
    if let Some(v) = &details.client_name {
        item.client_name = Some(v.clone());
    }
    if let Some(v) = &details.serial {
        item.serial = Some(v.clone());
    }
    if let Some(v) = &details.product_code {
        item.product_code = Some(v.clone());
    }
    if let Some(v) = &details.description {
        item.description = Some(v.clone());
    }
    if let Some(v) = details.monthly_value {
        item.monthly_value = v;
    }
}

fn ship(
    conn: &Connection,
    header: &ContractHeader,
    record: &MovementRecord,
    asset: &str,
    fingerprint: &Fingerprint,
    shipment: Shipment<'_>,
) -> Result<ItemChange, ImportError> {
    let (shipped_on, exchanged_on): (NaiveDate, Option<NaiveDate>) = match shipment {
        Shipment::Plain => (record.movement_date, None),
        Shipment::Replacing(old) => (old.shipped_on, Some(record.movement_date)),
    };

    if let Some(mut item) = rows::find_active_item(conn, &record.contract_number, asset, &record.client_code)? {
        overlay(&mut item, &record.details);
        // An exchange landing on an asset already out keeps that item's own clock.
        match shipment {
            Shipment::Plain => item.shipped_on = shipped_on,
            Shipment::Replacing(_) => item.exchanged_on = exchanged_on,
        }
        item.last_transaction = record.transaction;
        item.fingerprint = Some(fingerprint.clone());
        rows::update_item(conn, &item)?;
        return Ok(ItemChange {
            action: AuditAction::EnvioUpdated,
            item,
        });
    }

    let mut item = ContractItem {
        id: 0,
        header_id: header.id,
        contract_number: header.meta.contract_number.clone(),
        asset: asset.to_string(),
        client_code: record.client_code.clone(),
        client_name: Some(header.meta.client_name.clone()),
        serial: None,
        product_code: None,
        description: None,
        monthly_value: 0.0,
        shipped_on,
        exchanged_on,
        returned_on: None,
        last_transaction: record.transaction,
        status: ItemStatus::Active,
        fingerprint: Some(fingerprint.clone()),
        derived: Derived::default(),
    };
    if let Shipment::Replacing(old) = shipment {
        item.client_name = old.client_name.clone();
        item.monthly_value = old.monthly_value;
        if asset == old.asset {
            item.serial = old.serial.clone();
            item.product_code = old.product_code.clone();
            item.description = old.description.clone();
        }
    }
    overlay(&mut item, &record.details);
    item.id = rows::insert_item(conn, &item)?;
    Ok(ItemChange {
        action: AuditAction::EnvioInserted,
        item,
    })
}

/// Close the oldest active item matching the record, or fail the batch.
fn close(
    conn: &Connection,
    record: &MovementRecord,
    fingerprint: &Fingerprint,
) -> Result<ContractItem, ImportError> {
    let mut item = rows::find_active_item(
        conn,
        &record.contract_number,
        &record.asset,
        &record.client_code,
    )?
    .ok_or_else(|| ImportError::Reconciliation {
        row: record.row,
        contract: record.contract_number.clone(),
        asset: record.asset.clone(),
        client: record.client_code.clone(),
        transaction: record.transaction,
    })?;
    item.status = ItemStatus::Returned;
    item.returned_on = Some(record.movement_date);
    item.last_transaction = record.transaction;
    item.fingerprint = Some(fingerprint.clone());
    rows::update_item(conn, &item)?;
    Ok(item)
}
