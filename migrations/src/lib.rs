pub use sea_orm_migration::prelude::*;

mod m20240601_000000_create_users_table;
mod m20240601_000001_create_products_table;
mod m20240601_000002_create_inventory_table;
mod m20240601_000003_create_orders_table;
mod m20240601_000004_create_order_items_table;
mod m20240601_000005_create_inventory_adjustments_table;
mod m20240601_000006_create_payments_table;
mod m20240601_000007_create_outbox_events_table;
mod m20240601_000008_add_reservation_expiry_to_orders;

pub use m20240601_000003_create_orders_table::Orders;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000000_create_users_table::Migration),
            Box::new(m20240601_000001_create_products_table::Migration),
            Box::new(m20240601_000002_create_inventory_table::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
            Box::new(m20240601_000004_create_order_items_table::Migration),
            Box::new(m20240601_000005_create_inventory_adjustments_table::Migration),
            Box::new(m20240601_000006_create_payments_table::Migration),
            Box::new(m20240601_000007_create_outbox_events_table::Migration),
            Box::new(m20240601_000008_add_reservation_expiry_to_orders::Migration),
        ]
    }
}
