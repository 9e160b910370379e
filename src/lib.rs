//! Reference and resolution layer of an incremental-computation graph.
//!
//! Tagged attribute references, the resolver that follows them through
//! indirections, and the open-chaining hash table the graph engine uses for
//! its bookkeeping.

#![warn(missing_docs)]

pub mod attribute;
pub mod logging;
pub mod metadata;
pub mod primitives;
pub mod profile;
pub mod types;

pub use attribute::{
    AttributeId, AttributeStore, IndirectSpec, Kind, MemoryStore, OffsetAttributeId,
    TraversalOptions,
};
pub use primitives::table::{HashTable, SharedHeap, TableOptions};
pub use types::{Error, Result};
