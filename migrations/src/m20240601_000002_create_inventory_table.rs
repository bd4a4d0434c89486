use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_products_table::Products;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Inventory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Inventory::ProductId)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Inventory::Available)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Inventory::Reserved)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Inventory::OnHand)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Inventory::LowStockThreshold)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Inventory::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inventory_product_id")
                            .from(Inventory::Table, Inventory::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Row-level invariants: quantities never negative, and available+reserved
        // never exceeds on_hand. SQLite has no ALTER TABLE ADD CONSTRAINT, so these
        // only apply on Postgres; SQLite relies on the application-level conditional
        // UPDATEs in the reservation primitive for the same guarantee.
        let db = manager.get_connection();
        if db.get_database_backend() == sea_orm::DatabaseBackend::Postgres {
            db.execute_unprepared(
                "ALTER TABLE inventory ADD CONSTRAINT chk_inventory_nonneg
                    CHECK (available >= 0 AND reserved >= 0 AND on_hand >= 0)",
            )
            .await?;
            db.execute_unprepared(
                "ALTER TABLE inventory ADD CONSTRAINT chk_inventory_bound
                    CHECK (available + reserved <= on_hand)",
            )
            .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Inventory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Inventory {
    Table,
    ProductId,
    Available,
    Reserved,
    OnHand,
    LowStockThreshold,
    UpdatedAt,
}
