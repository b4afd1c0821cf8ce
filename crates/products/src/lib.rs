//! Products domain module (catalog events).
//!
//! This crate defines the product lifecycle events the catalog publishes, the topics
//! they travel on, and the emitter the CRUD layer calls once persistence commits.

pub mod emitter;
pub mod product;
pub mod topics;

pub use emitter::{ProductEventEmitter, ProductSnapshot};
pub use product::{Category, ProductDeleted, ProductUpserted, Unit};
pub use topics::{ProductTopics, delete_channels, upsert_channels};
