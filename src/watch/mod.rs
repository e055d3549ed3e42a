//! Cluster watcher (§4.A, §9).
//!
//! Maintains local indexed caches for the watched resource types, fans
//! in create/update/delete events from independent informer tasks onto a
//! single bounded ring buffer, and applies the filtering rules from §4.A
//! before anything is enqueued.

pub mod convert;
pub mod events;
pub mod informers;
pub mod store;

pub use events::{Event, ObjectKind, RingBuffer};
pub use informers::{backoff_schedule, InformerSet};
pub use store::{Store, StoreSet};
