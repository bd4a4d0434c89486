//! The three saga components and the expiry sweep that backs up
//! `InventoryWorker`'s reservation TTL. `OrderSubmit` is a synchronous
//! call invoked directly from the HTTP layer; the rest consume the event
//! bus and run as independent background tasks wired up in `main.rs`.

pub mod inventory_worker;
pub mod order_submit;
pub mod payment_simulator;
pub mod payment_worker;
pub mod sweep;

pub use inventory_worker::InventoryWorker;
pub use order_submit::{OrderSubmit, SubmitItem, SubmitRequest};
pub use payment_worker::PaymentWorker;
pub use sweep::ExpirySweep;
