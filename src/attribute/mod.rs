//! Attribute references and their resolution.
//!
//! An [`AttributeId`] is a tagged 32-bit reference to either a concrete
//! [`Node`] or an [`IndirectNode`] that forwards to another attribute,
//! possibly at a byte offset into its value. Resolution follows indirections
//! through an [`AttributeStore`] until it reaches a node or nil.

#![forbid(unsafe_code)]

mod id;
mod node;
mod resolve;
mod store;


pub use id::{AttributeId, Kind, OffsetAttributeId, TraversalOptions};
pub use node::{IndirectNode, Node, WeakAttributeId, MAX_INDIRECT_OFFSET};
pub use resolve::MAX_INDIRECTION_DEPTH;
pub use store::{AttributeStore, IndirectSpec, MemoryStore};
