//! Idempotent DDL. Applied on every open; `IF NOT EXISTS` everywhere.
//!
//! Tables carry no foreign keys and only two indexes (unique contract number,
//! fingerprint history key), neither of which is ever updated in place.
//! Dates are `DATE`; instants are RFC 3339 text.

pub(crate) const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS seq_headers START 1;
CREATE SEQUENCE IF NOT EXISTS seq_items START 1;
CREATE SEQUENCE IF NOT EXISTS seq_batches START 1;
CREATE SEQUENCE IF NOT EXISTS seq_audit START 1;

CREATE TABLE IF NOT EXISTS contract_headers (
    id               BIGINT  NOT NULL DEFAULT nextval('seq_headers'),
    contract_number  VARCHAR NOT NULL UNIQUE,
    client_code      VARCHAR,
    client_name      VARCHAR NOT NULL,
    cnpj             VARCHAR NOT NULL DEFAULT '',
    term_months      INTEGER NOT NULL DEFAULT 0,
    adjustment_index VARCHAR NOT NULL DEFAULT '',
    seller           VARCHAR NOT NULL DEFAULT '',
    start_date       DATE,
    months_remaining INTEGER NOT NULL DEFAULT 0,
    global_value     DOUBLE  NOT NULL DEFAULT 0,
    present_value    DOUBLE  NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contract_items (
    id               BIGINT  NOT NULL DEFAULT nextval('seq_items'),
    header_id        BIGINT  NOT NULL,
    contract_number  VARCHAR NOT NULL,
    asset            VARCHAR NOT NULL,
    client_code      VARCHAR NOT NULL,
    client_name      VARCHAR,
    serial           VARCHAR,
    product_code     VARCHAR,
    description      VARCHAR,
    monthly_value    DOUBLE  NOT NULL DEFAULT 0,
    shipped_on       DATE    NOT NULL,
    exchanged_on     DATE,
    returned_on      DATE,
    last_transaction VARCHAR NOT NULL,
    status           VARCHAR NOT NULL,
    fingerprint      VARCHAR,
    months_remaining INTEGER NOT NULL DEFAULT 0,
    global_value     DOUBLE  NOT NULL DEFAULT 0,
    present_value    DOUBLE  NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS import_batches (
    id                 BIGINT  NOT NULL DEFAULT nextval('seq_batches'),
    file_name          VARCHAR,
    status             VARCHAR NOT NULL,
    created_at         VARCHAR NOT NULL,
    closed_at          VARCHAR,
    total_rows         BIGINT  NOT NULL,
    duplicates         BIGINT  NOT NULL,
    invalid            BIGINT  NOT NULL,
    applied            BIGINT,
    skipped_duplicates BIGINT,
    rejected           BIGINT
);

CREATE TABLE IF NOT EXISTS staged_records (
    batch_id    BIGINT  NOT NULL,
    seq         BIGINT  NOT NULL,
    fingerprint VARCHAR NOT NULL,
    record      VARCHAR NOT NULL,
    warnings    VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS staged_exclusions (
    batch_id    BIGINT  NOT NULL,
    source_row  BIGINT  NOT NULL,
    kind        VARCHAR NOT NULL,
    fingerprint VARCHAR,
    messages    VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS movement_history (
    fingerprint  VARCHAR PRIMARY KEY,
    batch_id     BIGINT  NOT NULL,
    source_row   BIGINT  NOT NULL,
    committed_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id               BIGINT  NOT NULL DEFAULT nextval('seq_audit'),
    kind             VARCHAR NOT NULL,
    recorded_at      VARCHAR NOT NULL,
    batch_id         BIGINT,
    header_id        BIGINT,
    item_id          BIGINT,
    contract_number  VARCHAR NOT NULL,
    action           VARCHAR NOT NULL,
    asset            VARCHAR,
    client_code      VARCHAR,
    transaction_type VARCHAR,
    movement_date    DATE,
    fingerprint      VARCHAR,
    detail           VARCHAR NOT NULL
);
";

/// Tables the store expects after [`SCHEMA`] runs.
pub(crate) const TABLES: &[&str] = &[
    "contract_headers",
    "contract_items",
    "import_batches",
    "staged_records",
    "staged_exclusions",
    "movement_history",
    "audit_log",
];
