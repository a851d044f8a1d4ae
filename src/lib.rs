//! # lds-store
//!
//! Normalized record store for REST-like data APIs.
//!
//! Responses arrive as nested, denormalized JSON. The store breaks them into flat entries keyed by
//! `<Namespace>::<TypeName>:<id>`, replaces nested entities with links, and merges every incoming entity with what is
//! already cached field by field, using the container's weak etag to decide which side is authoritative.
//!
//! # The Basics
//!
//! - Ingestion is synchronous and atomic per key. Writes happen only when the merged result differs from the stored
//!   one, so subscribers are not notified about no-op refreshes.
//! - Reads produce owned [`Snapshot`](selector::Snapshot)s which tell fulfilled, unfulfilled, stale and error states
//!   apart. A [`FieldsTrie`](value::FieldsTrie) on the selector lets the store tell a field that was never fetched
//!   from a field that is legitimately `null`.
//! - An optional [`DurableStore`] is consulted on misses. In-memory data is always authoritative over durable data.
//! - Concurrent identical GET requests share one network round-trip; mutations are never shared.
//! - Implemented over the [moka](https://crates.io/crates/moka) cache.
//!
//! # Representations
//!
//! The store knows nothing about the shape of the data by itself. A [`Representation`] tells it, per entity type,
//! how the key is derived, which property holds field values, which properties nest other entities, which property
//! is the version, how long entries stay fresh and which merge strategy applies. Records and create-defaults
//! templates are provided in [`representation`].
//!
//! # Adapters
//!
//! [`adapters`] implement the usual read-through flow on top of an [`Environment`]: validate the untrusted
//! configuration, answer from the cache when possible, revive from the durable store, fall back to the network,
//! ingest, broadcast.

pub mod adapters;
pub mod coerce;
pub mod config;
pub mod dedupe;
pub mod entry;
pub mod environment;
pub mod error;
pub mod key;
pub mod merge;
pub mod normalize;
pub mod representation;
pub mod request;
pub mod revive;
pub mod selector;
pub mod store;
pub mod test;
pub mod throttle;
pub mod traits;
pub mod types;
pub mod value;

#[doc(inline)]
pub use environment::Environment;
#[doc(inline)]
pub use store::Store;
#[doc(inline)]
pub use traits::DurableStore;
#[doc(inline)]
pub use traits::NetworkAdapter;
#[doc(inline)]
pub use traits::Representation;

pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::entry::*;
    pub use crate::environment::Environment;
    pub use crate::error::*;
    pub use crate::representation::*;
    pub use crate::request::*;
    pub use crate::selector::Selector;
    pub use crate::selector::Snapshot;
    pub use crate::selector::Subscription;
    pub use crate::store::Change;
    pub use crate::store::Store;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use crate::value::*;
}
