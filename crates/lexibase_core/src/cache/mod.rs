//! Read-through caches for small reference tables.
//!
//! # Responsibility
//! - Keep low-cardinality lookup tables in memory in front of their
//!   repositories.
//! - Rebuild cached views wholesale so the direct map and any derived group
//!   index can never diverge from each other mid-update.
//!
//! # Invariants
//! - One reader/writer lock per cache instance; reloads and patches exclude
//!   all other access for their duration.
//! - A repository failure leaves the cache unloaded; the next read retries
//!   against the source of truth.
//! - The cache is never the source of truth.

mod catalog;
mod grouped;
mod keyed;

pub use catalog::ReferenceCatalog;
pub use grouped::GroupedCache;
pub use keyed::KeyedCache;
