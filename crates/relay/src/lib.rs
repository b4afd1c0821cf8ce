//! Catalog event relay.
//!
//! Wires configuration, a broker backend, the per-event-type publishers and their
//! retry workers into one running unit. The embedding catalog service takes the
//! [`ProductEventEmitter`](catalog_products::ProductEventEmitter) from [`app::Relay`]
//! and calls it after each committed write.

pub mod app;

pub use app::{Relay, RelayError};
