//! HTTP surface. Thin by design — the interesting behavior is
//! `OrderSubmit` and the saga workers; handlers only translate between
//! JSON and the saga's own request/response types.

pub mod orders;
