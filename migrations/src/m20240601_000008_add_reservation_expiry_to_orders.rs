use sea_orm_migration::prelude::*;

use super::m20240601_000003_create_orders_table::Orders;

/// DB-backed expiry index for the sweep loop, used in place of a KV
/// sorted set: the reservation lease is the correctness-irrelevant hint
/// the sweep prefers, but this column lets it discover candidates without
/// depending on a live KV connection.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Orders::Table)
                    .add_column(ColumnDef::new(OrdersExtra::ReservationExpiresAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_reservation_expiry")
                    .table(Orders::Table)
                    .col(OrdersExtra::ReservationExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Orders::Table)
                    .drop_column(OrdersExtra::ReservationExpiresAt)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum OrdersExtra {
    ReservationExpiresAt,
}
