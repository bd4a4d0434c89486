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
                    .table(InventoryAdjustments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventoryAdjustments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::ProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::AdjustmentType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::Quantity)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::AvailableBefore)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::AvailableAfter)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryAdjustments::Reason).string().null())
                    .col(
                        ColumnDef::new(InventoryAdjustments::ReferenceId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryAdjustments::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inventory_adjustments_product_id")
                            .from(InventoryAdjustments::Table, InventoryAdjustments::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inventory_adjustments_reference")
                    .table(InventoryAdjustments::Table)
                    .col(InventoryAdjustments::ReferenceId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InventoryAdjustments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum InventoryAdjustments {
    Table,
    Id,
    ProductId,
    AdjustmentType,
    Quantity,
    AvailableBefore,
    AvailableAfter,
    Reason,
    ReferenceId,
    CreatedAt,
}
