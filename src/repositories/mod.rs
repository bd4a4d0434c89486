//! Repositories own the SQL for each table group. Every cross-service
//! mutation the saga relies on for correctness (the conditional status
//! transition, the atomic reservation primitive, the idempotent payment
//! upsert) lives here as a single statement or a single transaction, never
//! split across a read-then-write round trip a concurrent writer could
//! interleave with.

pub mod inventory_repository;
pub mod order_repository;
pub mod payment_repository;
pub mod product_repository;

pub use inventory_repository::InventoryRepository;
pub use order_repository::{OrderRepository, OrderTransition};
pub use payment_repository::PaymentRepository;
pub use product_repository::ProductRepository;
