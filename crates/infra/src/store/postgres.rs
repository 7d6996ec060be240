//! Postgres-backed posting store.
//!
//! One database transaction per posting unit. Party and inventory rows are
//! taken with `SELECT … FOR UPDATE`, yearly counters are advanced with an
//! upsert that holds the counter row lock until commit, and the `documents`
//! table carries `UNIQUE (kind, year, number)`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `23505` on `documents_number_unique` | `DuplicateNumber` | number already used |
//! | `23505` (other) | `Conflict` | concurrent first insert of the same row |
//! | `40001` / `40P01` | `Conflict` | serialization failure / deadlock |
//! | `57014` | `Backend` | `statement_timeout` exceeded |
//! | `23514` | `Backend` | check constraint (negative balance or quantity) |
//! | Any other | `Backend` | network errors, pool closed, etc. |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tradebook_core::{AggregateId, AggregateRoot, ExpectedVersion, UserId};
use tradebook_documents::{Document, DocumentId, DocumentKind, SequenceCounter};
use tradebook_inventory::{Batch, BatchId, InventoryRecord};
use tradebook_parties::{
    LedgerEntry, PartyAccount, PartyId, PartyKind, PartyStatus, PaymentMode, TransactionType,
};
use tradebook_products::ProductId;

use super::{PostingStore, PostingTx, StoreError};

/// Schema applied by the migrator. Statements are idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS parties (
    id              UUID PRIMARY KEY,
    kind            TEXT NOT NULL CHECK (kind IN ('customer', 'vendor')),
    name            TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('active', 'suspended')),
    balance         NUMERIC NOT NULL DEFAULT 0 CHECK (balance >= 0),
    last_entry_id   UUID NULL,
    version         BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    seq                 BIGSERIAL PRIMARY KEY,
    id                  UUID NOT NULL UNIQUE,
    party_id            UUID NOT NULL REFERENCES parties (id),
    party_kind          TEXT NOT NULL,
    amount              NUMERIC NOT NULL CHECK (amount > 0),
    transaction_type    TEXT NOT NULL CHECK (transaction_type IN ('debit', 'credit')),
    payment_mode        TEXT NOT NULL,
    resulting_balance   NUMERIC NOT NULL CHECK (resulting_balance >= 0),
    description         TEXT NOT NULL,
    document_id         UUID NULL,
    created_by          UUID NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS ledger_entries_party_idx ON ledger_entries (party_id, seq);

CREATE TABLE IF NOT EXISTS sequence_counters (
    year    INTEGER NOT NULL,
    kind    TEXT NOT NULL,
    value   BIGINT NOT NULL CHECK (value >= 0),
    PRIMARY KEY (year, kind)
);

CREATE TABLE IF NOT EXISTS documents (
    id                  UUID PRIMARY KEY,
    kind                TEXT NOT NULL CHECK (kind IN ('invoice', 'purchase')),
    year                INTEGER NOT NULL,
    number              BIGINT NOT NULL CHECK (number > 0),
    display_number      TEXT NOT NULL,
    counterparty_id     UUID NOT NULL REFERENCES parties (id),
    total_amount        NUMERIC NOT NULL,
    is_deleted          BOOLEAN NOT NULL DEFAULT FALSE,
    is_return           BOOLEAN NOT NULL DEFAULT FALSE,
    body                JSONB NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    CONSTRAINT documents_number_unique UNIQUE (kind, year, number)
);

CREATE TABLE IF NOT EXISTS inventory_records (
    product_id      UUID PRIMARY KEY,
    total_quantity  NUMERIC NOT NULL CHECK (total_quantity >= 0),
    version         BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS batches (
    id                  UUID PRIMARY KEY,
    product_id          UUID NOT NULL REFERENCES inventory_records (product_id),
    source_document_id  UUID NOT NULL,
    unit_cost           NUMERIC NOT NULL CHECK (unit_cost > 0),
    current_quantity    NUMERIC NOT NULL CHECK (current_quantity >= 0),
    sale_unit_price     NUMERIC NULL,
    is_deleted          BOOLEAN NOT NULL DEFAULT FALSE,
    received_at         TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS batches_fifo_idx ON batches (product_id, received_at, id);
"#;

const NUMBER_CONSTRAINT: &str = "documents_number_unique";

/// Postgres-backed posting store.
///
/// `Send + Sync`; all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPostingStore {
    pool: Arc<PgPool>,
    statement_timeout: Duration,
}

impl PostgresPostingStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            statement_timeout,
        }
    }

    /// Connect a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))
    }

    /// Apply [`SCHEMA`], one statement at a time.
    #[instrument(skip(pool), err)]
    pub async fn migrate(pool: &PgPool) -> Result<usize, StoreError> {
        let mut applied = 0;
        for statement in schema_statements() {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
            applied += 1;
        }
        Ok(applied)
    }
}

fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Database transaction for one posting unit.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PgPostingTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgPostingTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPostingTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl PostingTx for PgPostingTx {
    #[instrument(skip(self), fields(party_id = %id), err)]
    async fn load_party(&mut self, id: PartyId) -> Result<Option<PartyAccount>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, name, status, balance, last_entry_id, version
            FROM parties
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_party", e))?;

        row.as_ref().map(party_from_row).transpose()
    }

    #[instrument(skip(self, product_id), fields(product_id = %product_id), err)]
    async fn load_inventory(&mut self, product_id: ProductId) -> Result<InventoryRecord, StoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT version
            FROM inventory_records
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_inventory", e))?;

        let Some(version) = version else {
            return Ok(InventoryRecord::empty(product_id));
        };

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, source_document_id, unit_cost, current_quantity,
                   sale_unit_price, is_deleted, received_at
            FROM batches
            WHERE product_id = $1
            ORDER BY received_at ASC, id ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_batches", e))?;

        let batches = rows.iter().map(batch_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(InventoryRecord::restore(product_id, batches, to_u64(version)?))
    }

    #[instrument(skip(self, kind), fields(kind = kind.as_str()), err)]
    async fn next_number(&mut self, kind: DocumentKind, year: i32) -> Result<u64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequence_counters (year, kind, value)
            VALUES ($1, $2, 1)
            ON CONFLICT (year, kind)
            DO UPDATE SET value = sequence_counters.value + 1
            RETURNING value
            "#,
        )
        .bind(year)
        .bind(kind.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_number", e))?;

        to_u64(value)
    }

    #[instrument(skip(self, document), fields(number = %document.number()), err)]
    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let body = serde_json::to_value(document)
            .map_err(|e| StoreError::Serialization(format!("document body: {e}")))?;
        let number = document.number();
        let flags = document.flags();

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, kind, year, number, display_number, counterparty_id,
                total_amount, is_deleted, is_return, body, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(document.id_typed().as_uuid())
        .bind(number.kind.as_str())
        .bind(number.year)
        .bind(to_i64(number.sequence)?)
        .bind(&number.display)
        .bind(document.counterparty_id().as_uuid())
        .bind(document.total_amount())
        .bind(flags.is_deleted)
        .bind(flags.is_return)
        .bind(body)
        .bind(document.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;

        Ok(())
    }

    #[instrument(
        skip(self, record),
        fields(product_id = %record.product_id(), version = record.version(), expected = ?expected),
        err
    )]
    async fn save_inventory(
        &mut self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inventory_records (product_id, total_quantity, version)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id)
            DO UPDATE SET total_quantity = EXCLUDED.total_quantity, version = EXCLUDED.version
            WHERE $4::BIGINT IS NULL OR inventory_records.version = $4
            "#,
        )
        .bind(record.product_id().as_uuid())
        .bind(record.total_quantity())
        .bind(to_i64(record.version())?)
        .bind(expected_param(expected)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_inventory", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "inventory of {}: expected {expected:?}",
                record.product_id()
            )));
        }

        for batch in record.batches() {
            sqlx::query(
                r#"
                INSERT INTO batches (
                    id, product_id, source_document_id, unit_cost, current_quantity,
                    sale_unit_price, is_deleted, received_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id)
                DO UPDATE SET current_quantity = EXCLUDED.current_quantity,
                              is_deleted = EXCLUDED.is_deleted
                "#,
            )
            .bind(batch.id.as_uuid())
            .bind(batch.product_id.as_uuid())
            .bind(batch.source_document_id.as_uuid())
            .bind(batch.unit_cost)
            .bind(batch.current_quantity)
            .bind(batch.sale_unit_price)
            .bind(batch.is_deleted)
            .bind(batch.received_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_batch", e))?;
        }

        Ok(())
    }

    #[instrument(
        skip(self, party, entries),
        fields(party_id = %party.id_typed(), entry_count = entries.len(), expected = ?expected),
        err
    )]
    async fn append_ledger(
        &mut self,
        party: &PartyAccount,
        entries: &[LedgerEntry],
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE parties
            SET balance = $2, last_entry_id = $3, version = $4
            WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(party.id_typed().as_uuid())
        .bind(party.balance())
        .bind(party.last_entry_id())
        .bind(to_i64(party.version())?)
        .bind(expected_param(expected)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_party", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "party {}: expected {expected:?}",
                party.id_typed()
            )));
        }

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    id, party_id, party_kind, amount, transaction_type, payment_mode,
                    resulting_balance, description, document_id, created_by, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id)
            .bind(entry.party_id.as_uuid())
            .bind(entry.party_kind.as_str())
            .bind(entry.amount)
            .bind(entry.transaction_type.as_str())
            .bind(entry.payment_mode.as_str())
            .bind(entry.resulting_balance)
            .bind(&entry.description)
            .bind(entry.document_id.map(Uuid::from))
            .bind(entry.created_by.as_uuid())
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl PostingStore for PostgresPostingStore {
    type Tx = PgPostingTx;

    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET LOCAL takes no bind parameters; the value is an integer we format.
        let timeout_ms = self.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;

        Ok(PgPostingTx { tx })
    }

    #[instrument(skip(self, party), fields(party_id = %party.id_typed()), err)]
    async fn register_party(&self, party: &PartyAccount) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO parties (id, kind, name, status, balance, last_entry_id, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(party.id_typed().as_uuid())
        .bind(party.kind().as_str())
        .bind(party.name())
        .bind(status_str(party.status()))
        .bind(party.balance())
        .bind(party.last_entry_id())
        .bind(to_i64(party.version())?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_party", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(document_id = %id), err)]
    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let body: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT body FROM documents WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_document", e))?;

        body.map(|b| {
            serde_json::from_value(b)
                .map_err(|e| StoreError::Serialization(format!("document body: {e}")))
        })
        .transpose()
    }

    #[instrument(skip(self, party_id), fields(party_id = %party_id), err)]
    async fn ledger(&self, party_id: PartyId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, party_id, party_kind, amount, transaction_type, payment_mode,
                   resulting_balance, description, document_id, created_by, created_at
            FROM ledger_entries
            WHERE party_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(party_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_ledger", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(party_id = %id), err)]
    async fn party(&self, id: PartyId) -> Result<Option<PartyAccount>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, name, status, balance, last_entry_id, version
            FROM parties
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_party", e))?;

        row.as_ref().map(party_from_row).transpose()
    }

    #[instrument(skip(self, product_id), fields(product_id = %product_id), err)]
    async fn inventory(&self, product_id: ProductId) -> Result<InventoryRecord, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM inventory_records WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_inventory", e))?;

        let Some(version) = version else {
            return Ok(InventoryRecord::empty(product_id));
        };

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, source_document_id, unit_cost, current_quantity,
                   sale_unit_price, is_deleted, received_at
            FROM batches
            WHERE product_id = $1
            ORDER BY received_at ASC, id ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_batches", e))?;

        let batches = rows.iter().map(batch_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(InventoryRecord::restore(product_id, batches, to_u64(version)?))
    }

    #[instrument(skip(self), err)]
    async fn counter(&self, year: i32) -> Result<SequenceCounter, StoreError> {
        let rows = sqlx::query("SELECT kind, value FROM sequence_counters WHERE year = $1")
            .bind(year)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_counter", e))?;

        let mut counter = SequenceCounter::new(year);
        for row in rows {
            let kind: String = row.try_get("kind").map_err(decode_error)?;
            let value: i64 = row.try_get("value").map_err(decode_error)?;
            let kind = DocumentKind::parse(&kind)
                .ok_or_else(|| StoreError::Serialization(format!("unknown document kind {kind}")))?;
            counter = counter.with_value(kind, to_u64(value)?);
        }
        Ok(counter)
    }
}

// Row decoding

fn party_from_row(row: &PgRow) -> Result<PartyAccount, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let balance: Decimal = row.try_get("balance").map_err(decode_error)?;
    let last_entry_id: Option<Uuid> = row.try_get("last_entry_id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;

    Ok(PartyAccount::restore(
        PartyId::new(AggregateId::from_uuid(id)),
        parse_party_kind(&kind)?,
        name,
        parse_status(&status)?,
        balance,
        last_entry_id,
        to_u64(version)?,
    ))
}

fn batch_from_row(row: &PgRow) -> Result<Batch, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let product_id: Uuid = row.try_get("product_id").map_err(decode_error)?;
    let source_document_id: Uuid = row.try_get("source_document_id").map_err(decode_error)?;
    let received_at: DateTime<Utc> = row.try_get("received_at").map_err(decode_error)?;

    Ok(Batch {
        id: BatchId::new(AggregateId::from_uuid(id)),
        product_id: ProductId::new(AggregateId::from_uuid(product_id)),
        source_document_id: AggregateId::from_uuid(source_document_id),
        unit_cost: row.try_get("unit_cost").map_err(decode_error)?,
        current_quantity: row.try_get("current_quantity").map_err(decode_error)?,
        sale_unit_price: row.try_get("sale_unit_price").map_err(decode_error)?,
        is_deleted: row.try_get("is_deleted").map_err(decode_error)?,
        received_at,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let party_id: Uuid = row.try_get("party_id").map_err(decode_error)?;
    let party_kind: String = row.try_get("party_kind").map_err(decode_error)?;
    let transaction_type: String = row.try_get("transaction_type").map_err(decode_error)?;
    let payment_mode: String = row.try_get("payment_mode").map_err(decode_error)?;
    let document_id: Option<Uuid> = row.try_get("document_id").map_err(decode_error)?;
    let created_by: Uuid = row.try_get("created_by").map_err(decode_error)?;

    Ok(LedgerEntry {
        id: row.try_get("id").map_err(decode_error)?,
        party_id: PartyId::new(AggregateId::from_uuid(party_id)),
        party_kind: parse_party_kind(&party_kind)?,
        amount: row.try_get("amount").map_err(decode_error)?,
        transaction_type: parse_transaction_type(&transaction_type)?,
        payment_mode: PaymentMode::parse(&payment_mode).ok_or_else(|| {
            StoreError::Serialization(format!("unknown payment mode {payment_mode}"))
        })?,
        resulting_balance: row.try_get("resulting_balance").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        document_id: document_id.map(AggregateId::from_uuid),
        created_by: UserId::from_uuid(created_by),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn parse_party_kind(s: &str) -> Result<PartyKind, StoreError> {
    PartyKind::parse(s).ok_or_else(|| StoreError::Serialization(format!("unknown party kind {s}")))
}

fn parse_transaction_type(s: &str) -> Result<TransactionType, StoreError> {
    match s {
        "debit" => Ok(TransactionType::Debit),
        "credit" => Ok(TransactionType::Credit),
        other => Err(StoreError::Serialization(format!(
            "unknown transaction type {other}"
        ))),
    }
}

fn status_str(status: PartyStatus) -> &'static str {
    match status {
        PartyStatus::Active => "active",
        PartyStatus::Suspended => "suspended",
    }
}

fn parse_status(s: &str) -> Result<PartyStatus, StoreError> {
    match s {
        "active" => Ok(PartyStatus::Active),
        "suspended" => Ok(PartyStatus::Suspended),
        other => Err(StoreError::Serialization(format!("unknown party status {other}"))),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(format!("failed to decode row: {err}"))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} overflows BIGINT")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("negative counter {value}")))
}

fn expected_param(expected: ExpectedVersion) -> Result<Option<i64>, StoreError> {
    match expected {
        ExpectedVersion::Any => Ok(None),
        ExpectedVersion::Exact(v) => to_i64(v).map(Some),
    }
}

/// Map SQLx errors to `StoreError` (see the table in the module docs).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let code = db_err.code().map(|c| c.into_owned());
            classify_sqlstate(code.as_deref(), db_err.constraint(), msg)
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

fn classify_sqlstate(code: Option<&str>, constraint: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") if constraint == Some(NUMBER_CONSTRAINT) => StoreError::DuplicateNumber(msg),
        Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
        Some("57014") => StoreError::Backend(format!("statement timeout: {msg}")),
        _ => StoreError::Backend(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_statements() {
        let statements: Vec<_> = schema_statements().collect();
        assert_eq!(statements.len(), 8);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }

    #[test]
    fn sqlstates_map_to_store_errors() {
        let msg = || "boom".to_string();
        assert!(matches!(
            classify_sqlstate(Some("23505"), Some(NUMBER_CONSTRAINT), msg()),
            StoreError::DuplicateNumber(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("23505"), Some("inventory_records_pkey"), msg()),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("40001"), None, msg()),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("40P01"), None, msg()),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("57014"), None, msg()),
            StoreError::Backend(_)
        ));
        assert!(matches!(classify_sqlstate(None, None, msg()), StoreError::Backend(_)));
    }

    #[test]
    fn expected_version_binds_as_nullable_bigint() {
        assert_eq!(expected_param(ExpectedVersion::Any).unwrap(), None);
        assert_eq!(expected_param(ExpectedVersion::Exact(3)).unwrap(), Some(3));
        assert!(to_u64(-1).is_err());
    }
}
