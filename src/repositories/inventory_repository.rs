//! The atomic conditional-decrement reservation primitive and its
//! two compensations (finalize on payment, release on cancel/expiry).
//!
//! `reserve_one` and `release_one` each combine their `UPDATE` with a
//! matching `inventory_adjustments` audit insert via a CTE, so the
//! stock mutation and its audit trail commit or roll back together.
//! `finalize_one` only retires reservation bookkeeping that the
//! original reserve step already audited, so it writes no new row. The
//! database's row lock on the `UPDATE` is the only synchronization
//! primitive involved; there is no in-process mutex standing in for it.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement, TransactionTrait};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::outbox;
use crate::events::EventData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved,
    OutOfStock { product_id: Uuid },
}

pub struct InventoryRepository {
    db: Arc<DatabaseConnection>,
}

impl InventoryRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Reserves every `(product_id, quantity)` pair for `order_id` inside
    /// one transaction. If any single item can't be satisfied the whole
    /// transaction rolls back — no partial reservation is ever visible.
    /// On full success the
    /// `inventory.reserved` outbox row is appended to the same
    /// transaction before commit, so the event can never exist without
    /// the decrement that produced it (or vice versa).
    pub async fn reserve_all(
        &self,
        order_id: Uuid,
        items: &[(Uuid, i32)],
    ) -> Result<ReservationOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        for (product_id, quantity) in items {
            let ok = reserve_one(&txn, *product_id, *quantity, order_id, now).await?;
            if !ok {
                // Transaction drops (and rolls back) when it goes out of
                // scope without a commit.
                return Ok(ReservationOutcome::OutOfStock {
                    product_id: *product_id,
                });
            }
        }

        outbox::enqueue(&txn, &EventData::InventoryReserved { order_id }).await?;
        txn.commit().await?;
        Ok(ReservationOutcome::Reserved)
    }

    /// Finalize: stock sold, reservation converted to a permanent
    /// on-hand decrement. No new event is published on success — the
    /// order's own `orders.paid` event already carries the meaning.
    pub async fn finalize_all(
        &self,
        order_id: Uuid,
        items: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        self.finalize_all_in_txn(&txn, order_id, items).await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn finalize_all_in_txn(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
        items: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        for (product_id, quantity) in items {
            finalize_one(conn, *product_id, *quantity, order_id, now).await?;
        }
        Ok(())
    }

    /// Release: reservation abandoned, stock returned to
    /// `available`. No new event is published here either — a caller
    /// that needs one alongside the release (the expiry sweep)
    /// uses `release_all_in_txn` to combine both in a single commit.
    pub async fn release_all(
        &self,
        order_id: Uuid,
        items: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        self.release_all_in_txn(&txn, order_id, items).await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn release_all_in_txn(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
        items: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        for (product_id, quantity) in items {
            release_one(conn, *product_id, *quantity, order_id, now).await?;
        }
        Ok(())
    }
}

/// Every statement here reuses several placeholders multiple times in
/// the SQL text (the same bound quantity appears in both the `SET` and
/// the `RETURNING` clauses). Postgres's `$N` is a true named reference
/// so reuse is free; a bare SQLite `?` is purely positional and a second
/// occurrence would demand a *second* bound value, so SQLite gets the
/// numbered `?NNN` form instead — both dialects then read the same
/// value back on every reuse.
fn placeholders(conn_backend: DatabaseBackend, n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| match conn_backend {
            DatabaseBackend::Postgres => format!("${}", i),
            _ => format!("?{}", i),
        })
        .collect()
}

/// Postgres has no scalar multi-argument `MAX`; `GREATEST` is its
/// two-value scalar equivalent. SQLite's `max()` switches to scalar
/// mode once given more than one argument, so plain `max` works there.
fn greatest_fn(conn_backend: DatabaseBackend) -> &'static str {
    match conn_backend {
        DatabaseBackend::Postgres => "GREATEST",
        _ => "MAX",
    }
}

async fn reserve_one(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
    quantity: i32,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let backend = conn.get_database_backend();
    let p = placeholders(backend, 5);
    let sql = format!(
        r#"WITH updated AS (
            UPDATE inventory
               SET available = available - {q},
                   reserved = reserved + {q},
                   updated_at = {now}
             WHERE product_id = {pid} AND available >= {q}
            RETURNING product_id, available AS available_after, available + {q} AS available_before
        )
        INSERT INTO inventory_adjustments
            (id, product_id, adjustment_type, quantity, available_before, available_after, reference_id, created_at)
        SELECT {adj_id}, product_id, 'sale', {q}, available_before, available_after, {order_id}, {now}
        FROM updated
        RETURNING available_after"#,
        pid = p[0],
        q = p[1],
        now = p[2],
        adj_id = p[3],
        order_id = p[4],
    );
    let stmt = Statement::from_sql_and_values(
        backend,
        sql,
        vec![
            product_id.into(),
            quantity.into(),
            now.into(),
            Uuid::new_v4().into(),
            order_id.into(),
        ],
    );
    let row = conn.query_one(stmt).await.map_err(map_db_err)?;
    Ok(row.is_some())
}

/// Converts a live reservation into a permanent on-hand decrement.
/// This does not append an `inventory_adjustments` row: the audit trail
/// for the sale was already written by `reserve_one` (§4.2.1 records
/// "one row per reserve step"), and finalize only retires the
/// reservation bookkeeping that row already accounts for.
async fn finalize_one(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
    quantity: i32,
    _order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let backend = conn.get_database_backend();
    let greatest = greatest_fn(backend);
    let p = placeholders(backend, 3);
    let sql = format!(
        r#"UPDATE inventory
               SET reserved = {greatest}(reserved - {q}, 0),
                   on_hand = {greatest}(on_hand - {q}, 0),
                   updated_at = {now}
             WHERE product_id = {pid}"#,
        pid = p[0],
        q = p[1],
        now = p[2],
    );
    let stmt = Statement::from_sql_and_values(
        backend,
        sql,
        vec![product_id.into(), quantity.into(), now.into()],
    );
    conn.execute(stmt).await.map_err(map_db_err)?;
    Ok(())
}

async fn release_one(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
    quantity: i32,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let backend = conn.get_database_backend();
    let greatest = greatest_fn(backend);
    let p = placeholders(backend, 5);
    let sql = format!(
        r#"WITH updated AS (
            UPDATE inventory
               SET available = available + {q},
                   reserved = {greatest}(reserved - {q}, 0),
                   updated_at = {now}
             WHERE product_id = {pid}
            RETURNING product_id, available AS available_after, available - {q} AS available_before
        )
        INSERT INTO inventory_adjustments
            (id, product_id, adjustment_type, quantity, available_before, available_after, reference_id, created_at)
        SELECT {adj_id}, product_id, 'return', {q}, available_before, available_after, {order_id}, {now}
        FROM updated"#,
        pid = p[0],
        q = p[1],
        now = p[2],
        adj_id = p[3],
        order_id = p[4],
    );
    let stmt = Statement::from_sql_and_values(
        backend,
        sql,
        vec![
            product_id.into(),
            quantity.into(),
            now.into(),
            Uuid::new_v4().into(),
            order_id.into(),
        ],
    );
    conn.execute(stmt).await.map_err(map_db_err)?;
    Ok(())
}

fn map_db_err(e: DbErr) -> ServiceError {
    ServiceError::Database(e)
}
