//! Low-level building blocks shared by the attribute layer.

/// Page arena backing every attribute record.
///
/// Hands out 4-byte aligned, page-relative pointers and tracks which zone
/// owns each page.
pub mod arena;

/// Generic open-chaining hash table.
pub mod table;
